use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::info;

use crate::api::health::HealthState;

use super::RetentionManager;

/// Next daily run strictly after `now`: today at `at` (UTC) if that is still
/// ahead, otherwise tomorrow.
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Runs the retention pass once a day, independent of check cycles.
pub struct RetentionScheduler {
    manager: RetentionManager,
    at: NaiveTime,
    health: Arc<HealthState>,
}

impl RetentionScheduler {
    pub fn new(manager: RetentionManager, at: NaiveTime, health: Arc<HealthState>) -> Self {
        Self { manager, at, health }
    }

    pub async fn run(self) {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.at);
            info!("[RETENTION] next cleanup at {next}");
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let started = Utc::now();
            let report = self.manager.run_once(started).await;
            self.health
                .record_cleanup(started.timestamp(), report.total_deleted(), report.failures().count());
        }
    }
}
