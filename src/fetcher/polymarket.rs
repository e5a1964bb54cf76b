use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::FetchLimits;
use crate::error::{AppError, Result};
use crate::types::{Exchange, RawMarket};

use super::{f64_field, parse_timestamp, str_field, ExchangeConnector, Page, PageRequest, Pagination};

/// Gamma REST listing connector. Offset-paged, ordered by total volume descending,
/// so pages may be fetched concurrently.
pub struct PolymarketConnector {
    client: reqwest::Client,
    limits: FetchLimits,
}

impl PolymarketConnector {
    pub fn new(limits: FetchLimits) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Per-page timeout is enforced by the pager; this only guards stuck sockets.
            .timeout(limits.page_timeout + Duration::from_secs(5))
            .build()?;
        Ok(Self { client, limits })
    }
}

#[async_trait]
impl ExchangeConnector for PolymarketConnector {
    fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    fn pagination(&self) -> Pagination {
        Pagination::Offset
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}&order=volumeNum&ascending=false",
            self.limits.base_url, request.limit, request.offset
        );

        let resp: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_markets_page(&resp)?;
        debug!(
            page = request.index,
            offset = request.offset,
            len = page.markets.len(),
            raw = page.raw_len,
            "[POLYMARKET] page parsed"
        );
        Ok(page)
    }
}

/// Normalize one `/markets` response. A non-array body is a page failure; an
/// individual unusable item is skipped.
pub fn parse_markets_page(resp: &serde_json::Value) -> Result<Page> {
    let items = resp
        .as_array()
        .ok_or_else(|| AppError::Payload("Polymarket /markets response was not an array".to_string()))?;
    Ok(Page {
        markets: items.iter().filter_map(parse_market).collect(),
        raw_len: items.len(),
        next_cursor: None,
    })
}

pub fn parse_market(v: &serde_json::Value) -> Option<RawMarket> {
    let market_id = str_field(v, "conditionId").or_else(|| str_field(v, "id"))?.to_string();
    let title = str_field(v, "question")?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let volume = f64_field(v, "volumeNum")
        .or_else(|| f64_field(v, "volume"))
        .unwrap_or(0.0)
        .max(0.0);

    let close_time = str_field(v, "endDate")
        .or_else(|| str_field(v, "endDateIso"))
        .and_then(parse_timestamp);

    Some(RawMarket {
        exchange: Exchange::Polymarket,
        market_id,
        title,
        volume,
        yes_price: yes_price(v),
        close_time,
        tags: tags(v),
    })
}

/// First entry of `outcomePrices`, which Gamma sends either as a JSON-encoded
/// string (`"[\"0.42\", \"0.58\"]"`) or as a plain array.
fn yes_price(v: &serde_json::Value) -> Option<f64> {
    let raw = v.get("outcomePrices")?;
    let prices: Vec<serde_json::Value> = match raw {
        serde_json::Value::String(s) => serde_json::from_str(s).ok()?,
        serde_json::Value::Array(a) => a.clone(),
        _ => return None,
    };
    let first = prices.first()?;
    let price = first
        .as_f64()
        .or_else(|| first.as_str().and_then(|s| s.trim().parse().ok()))?;
    (0.0..=1.0).contains(&price).then_some(price)
}

fn tags(v: &serde_json::Value) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(category) = str_field(v, "category") {
        out.push(category.to_string());
    }
    if let Some(events) = v.get("events").and_then(|e| e.as_array()) {
        out.extend(
            events
                .iter()
                .filter_map(|e| str_field(e, "category"))
                .map(str::to_string),
        );
    }
    if let Some(tags) = v.get("tags").and_then(|t| t.as_array()) {
        out.extend(
            tags.iter()
                .filter_map(|t| str_field(t, "label").or_else(|| t.as_str()))
                .map(str::to_string),
        );
    }
    out.sort();
    out.dedup();
    out
}
