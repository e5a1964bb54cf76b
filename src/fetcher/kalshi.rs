use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::FetchLimits;
use crate::error::{AppError, Result};
use crate::types::{Exchange, RawMarket};

use super::{f64_field, parse_timestamp, str_field, ExchangeConnector, Page, PageRequest, Pagination};

/// Kalshi page size ceiling accepted by `/markets`.
const KALSHI_MAX_PAGE_SIZE: usize = 200;

/// Kalshi public `/markets` connector. Cursor-paged, so pages are walked one at a time.
pub struct KalshiConnector {
    client: reqwest::Client,
    limits: FetchLimits,
}

impl KalshiConnector {
    pub fn new(limits: FetchLimits) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(limits.page_timeout + Duration::from_secs(5))
            .build()?;
        Ok(Self { client, limits })
    }
}

#[async_trait]
impl ExchangeConnector for KalshiConnector {
    fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    fn pagination(&self) -> Pagination {
        Pagination::Cursor
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let limit = request.limit.min(KALSHI_MAX_PAGE_SIZE).to_string();
        let mut query: Vec<(&str, &str)> = vec![("status", "open"), ("limit", limit.as_str())];
        if let Some(cursor) = request.cursor.as_deref() {
            query.push(("cursor", cursor));
        }

        let resp: serde_json::Value = self
            .client
            .get(format!("{}/markets", self.limits.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_markets_page(&resp)?;
        debug!(
            page = request.index,
            len = page.markets.len(),
            more = page.next_cursor.is_some(),
            "[KALSHI] page parsed"
        );
        Ok(page)
    }
}

pub fn parse_markets_page(resp: &serde_json::Value) -> Result<Page> {
    let items = resp
        .get("markets")
        .and_then(|m| m.as_array())
        .ok_or_else(|| AppError::Payload("Kalshi /markets response has no markets array".to_string()))?;

    Ok(Page {
        markets: items.iter().filter_map(parse_market).collect(),
        raw_len: items.len(),
        next_cursor: str_field(resp, "cursor").map(str::to_string),
    })
}

pub fn parse_market(v: &serde_json::Value) -> Option<RawMarket> {
    let market_id = str_field(v, "ticker")?.to_string();
    let title = str_field(v, "title")?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let volume = f64_field(v, "volume").unwrap_or(0.0).max(0.0);

    let close_time = str_field(v, "close_time")
        .or_else(|| str_field(v, "expiration_time"))
        .and_then(parse_timestamp);

    let mut tags: Vec<String> = ["category", "series_ticker", "event_ticker"]
        .iter()
        .filter_map(|key| str_field(v, key))
        .map(str::to_string)
        .collect();
    tags.dedup();

    Some(RawMarket {
        exchange: Exchange::Kalshi,
        market_id,
        title,
        volume,
        yes_price: yes_price(v),
        close_time,
        tags,
    })
}

/// Yes probability from the book midpoint. Kalshi quotes cents (0..100), with
/// `*_dollars` string variants on newer payloads; `last_price` is the fallback.
fn yes_price(v: &serde_json::Value) -> Option<f64> {
    let bid = f64_field(v, "yes_bid");
    let ask = f64_field(v, "yes_ask");
    let cents = match (bid, ask) {
        (Some(b), Some(a)) if a > 0.0 => Some((b + a) / 2.0),
        _ => None,
    };
    let price = match cents {
        Some(c) => Some(c / 100.0),
        None => match (f64_field(v, "yes_bid_dollars"), f64_field(v, "yes_ask_dollars")) {
            (Some(b), Some(a)) if a > 0.0 => Some((b + a) / 2.0),
            _ => f64_field(v, "last_price").filter(|p| *p > 0.0).map(|p| p / 100.0),
        },
    };
    price.filter(|p| (0.0..=1.0).contains(p))
}
