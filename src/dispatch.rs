use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::db::models::{NewQueueItem, NewSnapshot};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::types::{ClassifiedEvent, Delivery, EntityKind, Event, Tier};

#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub kind: EntityKind,
    pub event_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub snapshots_written: usize,
    pub alerts_queued: usize,
    pub digests_queued: usize,
    /// Queue items not written because of cooldown or an existing pending item.
    pub skipped: usize,
    pub failures: Vec<DispatchFailure>,
}

/// Turns tiered Events into snapshot rows and queue items for the delivery
/// collaborator. Never sends anything itself.
pub struct Dispatcher {
    store: Store,
    cooldown: Duration,
}

enum QueueDecision {
    Queued,
    Skipped,
}

impl Dispatcher {
    pub fn new(store: Store, cooldown_hours: u32) -> Self {
        Self { store, cooldown: Duration::hours(i64::from(cooldown_hours)) }
    }

    pub async fn dispatch(&self, classified: &[ClassifiedEvent], cycle_at: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for ce in classified {
            match ce.tier {
                Tier::Urgent => {
                    match self.write_snapshot(&ce.event, ce.tier, cycle_at).await {
                        Ok(()) => report.snapshots_written += 1,
                        Err(e) => record(&mut report, EntityKind::MarketSnapshot, &ce.event, e),
                    }
                    match self.queue_if_due(&ce.event, ce.tier, Delivery::Immediate, cycle_at).await {
                        Ok(QueueDecision::Queued) => report.alerts_queued += 1,
                        Ok(QueueDecision::Skipped) => report.skipped += 1,
                        Err(e) => record(&mut report, EntityKind::DigestQueue, &ce.event, e),
                    }
                }
                Tier::Hot => match self.queue_if_due(&ce.event, ce.tier, Delivery::Digest, cycle_at).await {
                    Ok(QueueDecision::Queued) => report.digests_queued += 1,
                    Ok(QueueDecision::Skipped) => report.skipped += 1,
                    Err(e) => record(&mut report, EntityKind::DigestQueue, &ce.event, e),
                },
                Tier::Normal | Tier::Ignored => {}
            }
        }

        if report.snapshots_written + report.alerts_queued + report.digests_queued > 0 {
            info!(
                snapshots = report.snapshots_written,
                alerts = report.alerts_queued,
                digests = report.digests_queued,
                skipped = report.skipped,
                "[DISPATCH] wrote {} snapshots, queued {} alerts and {} digest items",
                report.snapshots_written,
                report.alerts_queued,
                report.digests_queued,
            );
        }
        report
    }

    async fn write_snapshot(&self, event: &Event, tier: Tier, cycle_at: DateTime<Utc>) -> Result<()> {
        let primary = event.primary();
        let snapshot = NewSnapshot {
            event_id: event.id.clone(),
            exchange: primary.exchange.to_string(),
            market_id: primary.market_id.clone(),
            title: primary.title.clone(),
            volume: primary.volume,
            yes_price: primary.yes_price,
            tier: tier.to_string(),
            captured_at: cycle_at.timestamp(),
        };
        self.store.insert_snapshot(&snapshot).await?;
        Ok(())
    }

    async fn queue_if_due(
        &self,
        event: &Event,
        tier: Tier,
        delivery: Delivery,
        cycle_at: DateTime<Utc>,
    ) -> Result<QueueDecision> {
        let primary = event.primary();
        let exchange = primary.exchange.to_string();

        if self.store.has_pending(&exchange, &primary.market_id, delivery).await? {
            return Ok(QueueDecision::Skipped);
        }
        if delivery == Delivery::Immediate {
            let since = (cycle_at - self.cooldown).timestamp();
            if self.store.alerted_since(&exchange, &primary.market_id, delivery, since).await? {
                return Ok(QueueDecision::Skipped);
            }
        }

        let item = NewQueueItem {
            event_id: event.id.clone(),
            exchange,
            market_id: primary.market_id.clone(),
            title: primary.title.clone(),
            tier: tier.to_string(),
            delivery: delivery.as_str().to_string(),
            payload: payload(event, tier, cycle_at).to_string(),
            queued_at: cycle_at.timestamp(),
        };
        self.store.enqueue(&item).await?;
        Ok(QueueDecision::Queued)
    }
}

fn record(report: &mut DispatchReport, kind: EntityKind, event: &Event, e: AppError) {
    warn!(kind = %kind, event_id = %event.id, "[DISPATCH] write failed: {e}");
    report.failures.push(DispatchFailure { kind, event_id: event.id.clone(), error: e.to_string() });
}

/// Everything the delivery collaborator needs to render a notification.
pub fn payload(event: &Event, tier: Tier, cycle_at: DateTime<Utc>) -> serde_json::Value {
    let primary = event.primary();
    json!({
        "event_id": event.id,
        "title": primary.title,
        "tier": tier,
        "topic_tier": event.topic.topic_tier,
        "topic_reasoning": event.topic.reasoning,
        "total_volume": event.total_volume,
        "price_dispersion": event.price_dispersion,
        "member_count": event.members.len(),
        "exchanges": event.exchanges(),
        "primary": primary,
        "closes_at": event.closes_at,
        "signals": event.signals,
        "cycle_at": cycle_at,
    })
}
