use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::LatencyStats;
use crate::db::models::{AlertLogRow, QueueItemRow, SnapshotRow};
use crate::db::Store;
use crate::error::AppError;
use crate::types::Delivery;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/snapshots/:market_id", get(get_snapshots))
        .route("/queue/pending", get(get_pending_queue))
        .route("/queue/:id/sent", post(post_queue_sent))
        .route("/alerts/recent", get(get_recent_alerts))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SnapshotsQuery {
    pub exchange: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct PendingQuery {
    pub delivery: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct AckResponse {
    pub id: i64,
    /// False when the item had already been acknowledged.
    pub newly_sent: bool,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse { samples: state.latency.len(), p50_ms, p95_ms, p99_ms })
}

async fn get_snapshots(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
    Query(params): Query<SnapshotsQuery>,
) -> Result<Json<Vec<SnapshotRow>>, AppError> {
    let rows = state
        .store
        .snapshots_for(&market_id, params.exchange.as_deref(), clamp_limit(params.limit))
        .await?;
    Ok(Json(rows))
}

async fn get_pending_queue(
    State(state): State<ApiState>,
    Query(params): Query<PendingQuery>,
) -> Result<Json<Vec<QueueItemRow>>, AppError> {
    let delivery = match params.delivery.as_deref() {
        None => None,
        Some(raw) => Some(
            Delivery::parse(raw).ok_or_else(|| AppError::BadRequest(format!("unknown delivery {raw:?}")))?,
        ),
    };
    let rows = state.store.pending_items(delivery, clamp_limit(params.limit)).await?;
    Ok(Json(rows))
}

async fn post_queue_sent(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<AckResponse>, AppError> {
    let newly_sent = state.store.mark_sent(id, Utc::now().timestamp()).await?;
    Ok(Json(AckResponse { id, newly_sent }))
}

async fn get_recent_alerts(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<AlertLogRow>>, AppError> {
    let rows = state.store.recent_alerts(clamp_limit(params.limit)).await?;
    Ok(Json(rows))
}
