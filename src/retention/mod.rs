//! Age-based purge of persisted rows, one independent pass per entity kind.

pub mod schedule;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::db::Store;
use crate::error::Result;
use crate::relevance::RelevanceCache;
use crate::types::EntityKind;

pub use schedule::{next_run_after, RetentionScheduler};

#[derive(Debug, Clone, Serialize)]
pub struct PurgeOutcome {
    pub kind: EntityKind,
    pub window_days: u32,
    /// Rows at or before this unix-seconds cutoff were eligible.
    pub cutoff: i64,
    pub result: std::result::Result<u64, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub outcomes: Vec<PurgeOutcome>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> u64 {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PurgeOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn outcome(&self, kind: EntityKind) -> Option<&PurgeOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }
}

/// Sole deleter of persisted rows. A row is purged when its age timestamp is
/// `<= now - window`, so a row exactly one window old is deleted.
pub struct RetentionManager {
    store: Store,
    cache: Arc<RelevanceCache>,
    cfg: RetentionConfig,
}

impl RetentionManager {
    pub fn new(store: Store, cache: Arc<RelevanceCache>, cfg: RetentionConfig) -> Self {
        Self { store, cache, cfg }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> RetentionReport {
        let batch = self.cfg.batch_size;
        let mut report = RetentionReport::default();

        let snapshot_cutoff = cutoff(now, self.cfg.snapshot_days);
        report.outcomes.push(
            self.purge(EntityKind::MarketSnapshot, self.cfg.snapshot_days, snapshot_cutoff, async {
                self.store.purge_snapshots(snapshot_cutoff, batch).await
            })
            .await,
        );

        let alert_cutoff = cutoff(now, self.cfg.alert_log_days);
        report.outcomes.push(
            self.purge(EntityKind::AlertLog, self.cfg.alert_log_days, alert_cutoff, async {
                self.store.purge_alert_logs(alert_cutoff, batch).await
            })
            .await,
        );

        let digest_cutoff = cutoff(now, self.cfg.digest_days);
        report.outcomes.push(
            self.purge(EntityKind::DigestQueue, self.cfg.digest_days, digest_cutoff, async {
                self.store.purge_sent_queue_items(digest_cutoff, batch).await
            })
            .await,
        );

        if let Some(days) = self.cfg.topic_cache_days {
            let topic_cutoff = cutoff(now, days);
            report.outcomes.push(
                self.purge(EntityKind::TopicCache, days, topic_cutoff, async {
                    self.cache.purge_older_than(topic_cutoff, batch).await
                })
                .await,
            );
        }

        let failed = report.failures().count();
        info!(
            deleted = report.total_deleted(),
            failed_kinds = failed,
            "[RETENTION] cleanup finished: {} rows deleted, {failed} kinds failed",
            report.total_deleted(),
        );
        report
    }

    async fn purge<F>(&self, kind: EntityKind, window_days: u32, cutoff: i64, op: F) -> PurgeOutcome
    where
        F: std::future::Future<Output = Result<u64>>,
    {
        let result = match op.await {
            Ok(deleted) => {
                info!(kind = %kind, deleted, window_days, "[RETENTION] purged {deleted} {kind} rows");
                Ok(deleted)
            }
            Err(e) => {
                warn!(kind = %kind, window_days, "[RETENTION] purge failed: {e}");
                Err(e.to_string())
            }
        };
        PurgeOutcome { kind, window_days, cutoff, result }
    }
}

fn cutoff(now: DateTime<Utc>, days: u32) -> i64 {
    (now - Duration::days(i64::from(days))).timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::db::models::{NewQueueItem, NewSnapshot};
    use crate::db::test_pool;
    use crate::types::{RelevanceDecision, TopicTier};

    const DAY: i64 = 86_400;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 8, 3, 0, 0).unwrap()
    }

    fn snapshot(captured_at: i64) -> NewSnapshot {
        NewSnapshot {
            event_id: "e".to_string(),
            exchange: "kalshi".to_string(),
            market_id: format!("m{captured_at}"),
            title: "t".to_string(),
            volume: 1.0,
            yes_price: None,
            tier: "urgent".to_string(),
            captured_at,
        }
    }

    fn queue_item(market_id: &str, queued_at: i64) -> NewQueueItem {
        NewQueueItem {
            event_id: "e".to_string(),
            exchange: "polymarket".to_string(),
            market_id: market_id.to_string(),
            title: "t".to_string(),
            tier: "hot".to_string(),
            delivery: "digest".to_string(),
            payload: "{}".to_string(),
            queued_at,
        }
    }

    async fn setup() -> (Store, Arc<RelevanceCache>, RetentionManager) {
        let store = Store::new(test_pool().await);
        let cache = Arc::new(RelevanceCache::new(store.clone()));
        let manager = RetentionManager::new(store.clone(), cache.clone(), RetentionConfig::default());
        (store, cache, manager)
    }

    async fn count(store: &Store, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(store.pool())
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn snapshot_boundary_is_inclusive() {
        let (store, _, manager) = setup().await;
        let now_ts = now().timestamp();
        store.insert_snapshot(&snapshot(now_ts - 8 * DAY)).await.unwrap();
        store.insert_snapshot(&snapshot(now_ts - 7 * DAY)).await.unwrap();
        store.insert_snapshot(&snapshot(now_ts - 7 * DAY + 1)).await.unwrap();
        store.insert_snapshot(&snapshot(now_ts - DAY)).await.unwrap();

        let report = manager.run_once(now()).await;
        let outcome = report.outcome(EntityKind::MarketSnapshot).unwrap();
        assert_eq!(outcome.result, Ok(2));
        assert_eq!(outcome.cutoff, now_ts - 7 * DAY);

        let left = store.snapshots_for(&format!("m{}", now_ts - 7 * DAY + 1), None, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(count(&store, "market_snapshots").await, 2);
    }

    #[tokio::test]
    async fn second_run_deletes_nothing() {
        let (store, _, manager) = setup().await;
        store.insert_snapshot(&snapshot(now().timestamp() - 30 * DAY)).await.unwrap();

        assert_eq!(manager.run_once(now()).await.total_deleted(), 1);
        let again = manager.run_once(now()).await;
        assert_eq!(again.total_deleted(), 0);
        assert_eq!(again.failures().count(), 0);
    }

    #[tokio::test]
    async fn unsent_queue_items_are_never_purged() {
        let (store, _, manager) = setup().await;
        let now_ts = now().timestamp();
        let old_sent = store.enqueue(&queue_item("sent", now_ts - 40 * DAY)).await.unwrap();
        store.mark_sent(old_sent, now_ts - 30 * DAY).await.unwrap();
        store.enqueue(&queue_item("unsent", now_ts - 60 * DAY)).await.unwrap();

        let report = manager.run_once(now()).await;
        assert_eq!(report.outcome(EntityKind::DigestQueue).unwrap().result, Ok(1));
        // 30-day-old alert log falls exactly on the 30 day window.
        assert_eq!(report.outcome(EntityKind::AlertLog).unwrap().result, Ok(1));

        let pending = store.pending_items(None, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].market_id, "unsent");
    }

    #[tokio::test]
    async fn failing_kind_does_not_stop_the_others() {
        let (store, _, manager) = setup().await;
        store.insert_snapshot(&snapshot(now().timestamp() - 10 * DAY)).await.unwrap();
        sqlx::query("DROP TABLE alert_logs").execute(store.pool()).await.unwrap();

        let report = manager.run_once(now()).await;
        assert_eq!(report.outcomes.len(), 4);
        let failed: Vec<EntityKind> = report.failures().map(|o| o.kind).collect();
        assert_eq!(failed, vec![EntityKind::AlertLog]);
        assert_eq!(report.outcome(EntityKind::MarketSnapshot).unwrap().result, Ok(1));
        assert!(report.outcome(EntityKind::DigestQueue).unwrap().result.is_ok());
    }

    #[tokio::test]
    async fn topic_cache_purge_covers_memory_and_can_be_disabled() {
        let (store, cache, manager) = setup().await;
        let decision = RelevanceDecision { is_relevant: true, topic_tier: TopicTier::S, reasoning: String::new() };
        cache.store("stale", &decision, now().timestamp() - 31 * DAY).await;
        cache.store("fresh", &decision, now().timestamp() - DAY).await;

        let report = manager.run_once(now()).await;
        assert_eq!(report.outcome(EntityKind::TopicCache).unwrap().result, Ok(1));
        assert_eq!(cache.len(), 1);

        cache.store("stale", &decision, now().timestamp() - 31 * DAY).await;
        let cfg = RetentionConfig { topic_cache_days: None, ..RetentionConfig::default() };
        let keep_forever = RetentionManager::new(store, cache.clone(), cfg);
        let report = keep_forever.run_once(now()).await;
        assert!(report.outcome(EntityKind::TopicCache).is_none());
        assert_eq!(cache.len(), 2);
    }
}
