use serde::Serialize;

/// Row types for the four persisted tables. Timestamps are unix seconds.

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub event_id: String,
    pub exchange: String,
    pub market_id: String,
    pub title: String,
    pub volume: f64,
    pub yes_price: Option<f64>,
    pub tier: String,
    pub captured_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueItemRow {
    pub id: i64,
    pub event_id: String,
    pub exchange: String,
    pub market_id: String,
    pub title: String,
    pub tier: String,
    pub delivery: String,
    pub payload: String,
    pub queued_at: i64,
    pub sent: bool,
    pub sent_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertLogRow {
    pub id: i64,
    pub queue_item_id: i64,
    pub exchange: String,
    pub market_id: String,
    pub title: String,
    pub tier: String,
    pub delivery: String,
    pub payload: String,
    pub sent_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TopicCacheRow {
    pub fingerprint: String,
    pub is_relevant: bool,
    pub topic_tier: String,
    pub reasoning: String,
    pub cached_at: i64,
}

/// Insert shape for a snapshot; `id` is assigned by SQLite.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub event_id: String,
    pub exchange: String,
    pub market_id: String,
    pub title: String,
    pub volume: f64,
    pub yes_price: Option<f64>,
    pub tier: String,
    pub captured_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub event_id: String,
    pub exchange: String,
    pub market_id: String,
    pub title: String,
    pub tier: String,
    pub delivery: String,
    pub payload: String,
    pub queued_at: i64,
}
