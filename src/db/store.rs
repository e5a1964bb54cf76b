use sqlx::SqlitePool;
use tracing::debug;

use crate::db::models::{AlertLogRow, NewQueueItem, NewSnapshot, QueueItemRow, SnapshotRow, TopicCacheRow};
use crate::error::{AppError, Result};
use crate::types::Delivery;

/// Typed access to the persisted tables. Cheap to clone; all clones share the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- market_snapshots ---

    pub async fn insert_snapshot(&self, s: &NewSnapshot) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO market_snapshots (
                event_id, exchange, market_id, title, volume, yes_price, tier, captured_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.event_id)
        .bind(&s.exchange)
        .bind(&s.market_id)
        .bind(&s.title)
        .bind(s.volume)
        .bind(s.yes_price)
        .bind(&s.tier)
        .bind(s.captured_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest first.
    pub async fn snapshots_for(&self, market_id: &str, exchange: Option<&str>, limit: i64) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, event_id, exchange, market_id, title, volume, yes_price, tier, captured_at
            FROM market_snapshots
            WHERE market_id = ? AND (? IS NULL OR exchange = ?)
            ORDER BY captured_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(market_id)
        .bind(exchange)
        .bind(exchange)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Volume of the newest snapshot captured within `[from, to]`.
    pub async fn snapshot_volume_between(&self, exchange: &str, market_id: &str, from: i64, to: i64) -> Result<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as(
            r#"
            SELECT volume FROM market_snapshots
            WHERE exchange = ? AND market_id = ? AND captured_at BETWEEN ? AND ?
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(exchange)
        .bind(market_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(volume,)| volume))
    }

    // --- digest_queue ---

    pub async fn enqueue(&self, item: &NewQueueItem) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO digest_queue (
                event_id, exchange, market_id, title, tier, delivery, payload, queued_at, sent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&item.event_id)
        .bind(&item.exchange)
        .bind(&item.market_id)
        .bind(&item.title)
        .bind(&item.tier)
        .bind(&item.delivery)
        .bind(&item.payload)
        .bind(item.queued_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Whether an unsent item of this delivery kind already exists for the market.
    pub async fn has_pending(&self, exchange: &str, market_id: &str, delivery: Delivery) -> Result<bool> {
        let (exists,): (i64,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM digest_queue
                WHERE exchange = ? AND market_id = ? AND delivery = ? AND sent = 0
            )
            "#,
        )
        .bind(exchange)
        .bind(market_id)
        .bind(delivery.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Oldest first, optionally restricted to one delivery kind.
    pub async fn pending_items(&self, delivery: Option<Delivery>, limit: i64) -> Result<Vec<QueueItemRow>> {
        let delivery = delivery.map(|d| d.as_str());
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT id, event_id, exchange, market_id, title, tier, delivery, payload, queued_at, sent, sent_at
            FROM digest_queue
            WHERE sent = 0 AND (? IS NULL OR delivery = ?)
            ORDER BY queued_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(delivery)
        .bind(delivery)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delivery acknowledgement: flip the item to sent and append its AlertLog
    /// in one transaction. Returns false when the item was already sent, in
    /// which case nothing is written.
    ///
    /// The guarded UPDATE runs first so the transaction takes the write lock
    /// before reading; concurrent acks of one id queue on the busy timeout.
    pub async fn mark_sent(&self, id: i64, sent_at: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query("UPDATE digest_queue SET sent = 1, sent_at = ? WHERE id = ? AND sent = 0")
            .bind(sent_at)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if flipped == 0 {
            let (exists,): (i64,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM digest_queue WHERE id = ?)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            tx.rollback().await?;
            if exists == 0 {
                return Err(AppError::NotFound(format!("queue item {id}")));
            }
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO alert_logs (
                queue_item_id, exchange, market_id, title, tier, delivery, payload, sent_at
            )
            SELECT id, exchange, market_id, title, tier, delivery, payload, ?
            FROM digest_queue WHERE id = ?
            "#,
        )
        .bind(sent_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // --- alert_logs ---

    /// Whether the market was delivered with this delivery kind at or after `since`.
    pub async fn alerted_since(&self, exchange: &str, market_id: &str, delivery: Delivery, since: i64) -> Result<bool> {
        let (exists,): (i64,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM alert_logs
                WHERE exchange = ? AND market_id = ? AND delivery = ? AND sent_at >= ?
            )
            "#,
        )
        .bind(exchange)
        .bind(market_id)
        .bind(delivery.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<AlertLogRow>> {
        let rows = sqlx::query_as::<_, AlertLogRow>(
            r#"
            SELECT id, queue_item_id, exchange, market_id, title, tier, delivery, payload, sent_at
            FROM alert_logs
            ORDER BY sent_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- topic_cache ---

    pub async fn get_topic(&self, fingerprint: &str) -> Result<Option<TopicCacheRow>> {
        let row = sqlx::query_as::<_, TopicCacheRow>(
            "SELECT fingerprint, is_relevant, topic_tier, reasoning, cached_at FROM topic_cache WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_topic(&self, row: &TopicCacheRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO topic_cache (fingerprint, is_relevant, topic_tier, reasoning, cached_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                is_relevant = excluded.is_relevant,
                topic_tier  = excluded.topic_tier,
                reasoning   = excluded.reasoning,
                cached_at   = excluded.cached_at
            "#,
        )
        .bind(&row.fingerprint)
        .bind(row.is_relevant)
        .bind(&row.topic_tier)
        .bind(&row.reasoning)
        .bind(row.cached_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- retention ---

    pub async fn purge_snapshots(&self, cutoff: i64, batch: u32) -> Result<u64> {
        self.purge_batched("market_snapshots", "captured_at <= ?", cutoff, batch).await
    }

    pub async fn purge_alert_logs(&self, cutoff: i64, batch: u32) -> Result<u64> {
        self.purge_batched("alert_logs", "sent_at <= ?", cutoff, batch).await
    }

    /// Only sent items age out; unsent items are never touched.
    pub async fn purge_sent_queue_items(&self, cutoff: i64, batch: u32) -> Result<u64> {
        self.purge_batched("digest_queue", "sent = 1 AND sent_at <= ?", cutoff, batch).await
    }

    pub async fn purge_topics(&self, cutoff: i64, batch: u32) -> Result<u64> {
        self.purge_batched("topic_cache", "cached_at <= ?", cutoff, batch).await
    }

    /// Delete matching rows `batch` at a time, yielding between statements so
    /// appends from a running cycle can interleave.
    async fn purge_batched(&self, table: &'static str, predicate: &'static str, cutoff: i64, batch: u32) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN (SELECT rowid FROM {table} WHERE {predicate} LIMIT ?)"
        );
        let mut total = 0u64;
        loop {
            let deleted = sqlx::query(&sql)
                .bind(cutoff)
                .bind(i64::from(batch))
                .execute(&self.pool)
                .await?
                .rows_affected();
            total += deleted;
            debug!(table, deleted, total, "[RETENTION] batch");
            if deleted < u64::from(batch) {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(total)
    }
}
