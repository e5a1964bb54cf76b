//! Time signals for tiering: close proximity, and primary-market volume growth
//! read back from `market_snapshots`.

use chrono::{DateTime, Duration, Utc};

use crate::db::Store;
use crate::error::Result;
use crate::types::Event;

const SECS_PER_DAY: f64 = 86_400.0;

pub struct SignalReader {
    store: Store,
}

impl SignalReader {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Fill `event.signals` as of `now`. Proximity is always set when the
    /// Event has a close time, even if the history lookup fails.
    pub async fn annotate(&self, event: &mut Event, now: DateTime<Utc>) -> Result<()> {
        event.signals.days_to_close = event.closes_at.map(|close| (close - now).num_seconds() as f64 / SECS_PER_DAY);

        let primary = event.primary();
        let exchange = primary.exchange.to_string();
        let market_id = primary.market_id.clone();
        let current = primary.volume;

        let growth_1h = self.growth(&exchange, &market_id, current, now, 1).await?;
        let growth_6h = self.growth(&exchange, &market_id, current, now, 6).await?;
        event.signals.volume_growth_1h = growth_1h;
        event.signals.volume_growth_6h = growth_6h;
        Ok(())
    }

    /// Growth against the newest snapshot aged between `hours` and `2 * hours`.
    /// None without such a baseline or when it recorded zero volume.
    async fn growth(&self, exchange: &str, market_id: &str, current: f64, now: DateTime<Utc>, hours: i64) -> Result<Option<f64>> {
        let to = (now - Duration::hours(hours)).timestamp();
        let from = (now - Duration::hours(2 * hours)).timestamp();
        let baseline = self.store.snapshot_volume_between(exchange, market_id, from, to).await?;
        Ok(baseline.filter(|b| *b > 0.0).map(|b| (current - b) / b))
    }
}
