//! Exchange listing fetch: one bounded, paginated fetch per exchange per check cycle.
//!
//! Connectors only know how to request and normalize a single page. The pager
//! here owns the cross-page policy: worker bound, page budget, market cap,
//! per-page timeout + retry, and partial results when a page fails.

pub mod kalshi;
pub mod polymarket;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

use crate::config::FetchLimits;
use crate::error::{AppError, Result};
use crate::retry::{retry_async, RetryPolicy};
use crate::types::{Exchange, RawMarket};

pub use kalshi::KalshiConnector;
pub use polymarket::PolymarketConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Page N is addressable up front (`offset = N * page_size`); pages may be fetched concurrently.
    Offset,
    /// Each page names the next one; pages are walked sequentially.
    Cursor,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Zero-based page number within this fetch.
    pub index: usize,
    pub limit: usize,
    pub offset: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Default)]
pub struct Page {
    pub markets: Vec<RawMarket>,
    /// Items in the response before normalization dropped unusable ones.
    /// Page-length checks use this, not `markets.len()`.
    pub raw_len: usize,
    /// Cursor for the following page. Only meaningful for cursor sources.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn limits(&self) -> &FetchLimits;

    fn pagination(&self) -> Pagination;

    /// Fetch and normalize one page. Must not retry internally.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page>;

    fn exchange(&self) -> Exchange {
        self.limits().exchange
    }
}

#[derive(Debug, Clone)]
pub struct PageFailure {
    pub exchange: Exchange,
    pub page: usize,
    pub error: String,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub exchange: Exchange,
    /// Normalized markets in page order, truncated to the configured cap.
    pub markets: Vec<RawMarket>,
    pub pages_fetched: usize,
    pub failures: Vec<PageFailure>,
    /// True when markets were dropped to respect the cap.
    pub truncated: bool,
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Fetch one exchange's listings. Never fails as a whole: page failures end the
/// walk early and are reported alongside whatever was gathered.
pub async fn fetch_markets(connector: Arc<dyn ExchangeConnector>, policy: &RetryPolicy) -> FetchOutcome {
    let exchange = connector.exchange();
    let (pages, failures) = match connector.pagination() {
        Pagination::Offset => fetch_offset_pages(connector.clone(), policy).await,
        Pagination::Cursor => fetch_cursor_pages(connector.as_ref(), policy).await,
    };

    let pages_fetched = pages.len();
    let mut markets: Vec<RawMarket> = pages.into_values().flatten().collect();

    let cap = connector.limits().max_markets;
    let truncated = markets.len() > cap;
    markets.truncate(cap);

    for failure in &failures {
        warn!(
            exchange = %failure.exchange,
            page = failure.page,
            "[FETCH] page failed, returning partial result: {}",
            failure.error,
        );
    }
    info!(
        exchange = %exchange,
        markets = markets.len(),
        pages = pages_fetched,
        failed_pages = failures.len(),
        truncated,
        "[FETCH] {exchange}: {} markets from {pages_fetched} pages",
        markets.len(),
    );

    FetchOutcome {
        exchange,
        markets,
        pages_fetched,
        failures,
        truncated,
    }
}

/// Offset pages: keep up to `workers` pages in flight. The first failure stops
/// scheduling but siblings already in flight are allowed to finish.
async fn fetch_offset_pages(
    connector: Arc<dyn ExchangeConnector>,
    policy: &RetryPolicy,
) -> (BTreeMap<usize, Vec<RawMarket>>, Vec<PageFailure>) {
    let limits = connector.limits().clone();
    let mut in_flight: JoinSet<Result<Page>> = JoinSet::new();
    let mut scheduled: HashMap<task::Id, usize> = HashMap::new();
    let mut pages = BTreeMap::new();
    let mut failures = Vec::new();
    let mut next_page = 0usize;
    let mut collected = 0usize;
    let mut stop = false;

    loop {
        while !stop && in_flight.len() < limits.workers && next_page < limits.max_pages {
            let request = PageRequest {
                index: next_page,
                limit: limits.page_size,
                offset: next_page * limits.page_size,
                cursor: None,
            };
            let connector = Arc::clone(&connector);
            let policy = policy.clone();
            let handle = in_flight.spawn(async move {
                fetch_page_with_retry(connector.as_ref(), &request, &policy).await
            });
            scheduled.insert(handle.id(), next_page);
            next_page += 1;
        }

        let Some(joined) = in_flight.join_next_with_id().await else {
            break;
        };
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(join_err) => join_err.id(),
        };
        let index = scheduled.remove(&id).unwrap_or_default();

        match joined {
            Ok((_, Ok(page))) => {
                let len = page.markets.len();
                debug!(exchange = %limits.exchange, page = index, len, raw = page.raw_len, "[FETCH] page ok");
                if page.raw_len < limits.page_size {
                    stop = true;
                }
                collected += len;
                if collected >= limits.max_markets {
                    stop = true;
                }
                pages.insert(index, page.markets);
            }
            Ok((_, Err(e))) => {
                stop = true;
                failures.push(PageFailure {
                    exchange: limits.exchange,
                    page: index,
                    error: e.to_string(),
                });
            }
            Err(join_err) => {
                stop = true;
                failures.push(PageFailure {
                    exchange: limits.exchange,
                    page: index,
                    error: format!("page task failed: {join_err}"),
                });
            }
        }
    }

    (pages, failures)
}

async fn fetch_cursor_pages(
    connector: &dyn ExchangeConnector,
    policy: &RetryPolicy,
) -> (BTreeMap<usize, Vec<RawMarket>>, Vec<PageFailure>) {
    let limits = connector.limits();
    let mut pages = BTreeMap::new();
    let mut failures = Vec::new();
    let mut cursor: Option<String> = None;
    let mut collected = 0usize;

    for index in 0..limits.max_pages {
        let request = PageRequest {
            index,
            limit: limits.page_size,
            offset: collected,
            cursor: cursor.take(),
        };
        match fetch_page_with_retry(connector, &request, policy).await {
            Ok(page) => {
                collected += page.markets.len();
                let empty = page.raw_len == 0;
                pages.insert(index, page.markets);
                match page.next_cursor.filter(|c| !c.is_empty()) {
                    Some(next) if !empty && collected < limits.max_markets => cursor = Some(next),
                    _ => break,
                }
            }
            Err(e) => {
                failures.push(PageFailure {
                    exchange: limits.exchange,
                    page: index,
                    error: e.to_string(),
                });
                break;
            }
        }
    }

    (pages, failures)
}

async fn fetch_page_with_retry(
    connector: &dyn ExchangeConnector,
    request: &PageRequest,
    policy: &RetryPolicy,
) -> Result<Page> {
    let op_name = format!("{}_page_{}", connector.exchange(), request.index);
    retry_async(policy, &op_name, || fetch_page_once(connector, request)).await
}

async fn fetch_page_once(connector: &dyn ExchangeConnector, request: &PageRequest) -> Result<Page> {
    let limits = connector.limits();
    match tokio::time::timeout(limits.page_timeout, connector.fetch_page(request)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            exchange: limits.exchange.to_string(),
            page: request.index,
            secs: limits.page_timeout.as_secs(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Shared payload helpers
// ---------------------------------------------------------------------------

/// Read a numeric field that exchanges send either as a JSON number or a numeric string.
pub fn f64_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.trim().parse().ok())))
        .filter(|x: &f64| x.is_finite())
}

pub fn str_field<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|s| s.as_str()).filter(|s| !s.is_empty())
}

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date as midnight UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
