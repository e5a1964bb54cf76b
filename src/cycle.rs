use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::cluster::ClusteringEngine;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::fetcher::{fetch_markets, ExchangeConnector, PageFailure};
use crate::filter::filter_by_volume;
use crate::retry::RetryPolicy;
use crate::signals::SignalReader;
use crate::tiering::{classify, TierThresholds};
use crate::types::{ClassifiedEvent, Exchange, Tier};

#[derive(Debug, Default)]
pub struct CycleReport {
    pub fetched: BTreeMap<Exchange, usize>,
    pub fetch_failures: Vec<PageFailure>,
    pub truncated: Vec<Exchange>,
    pub kept_after_filter: usize,
    pub events: usize,
    pub irrelevant: usize,
    pub unclassified: Vec<(String, String)>,
    /// Events tiered without volume history because the lookup failed.
    pub history_failures: usize,
    pub tiers: BTreeMap<Tier, usize>,
    pub dispatch: DispatchReport,
}

impl CycleReport {
    pub fn degraded(&self) -> bool {
        !self.fetch_failures.is_empty()
            || !self.unclassified.is_empty()
            || self.history_failures > 0
            || !self.dispatch.failures.is_empty()
    }

    fn tier_count(&self, tier: Tier) -> usize {
        self.tiers.get(&tier).copied().unwrap_or(0)
    }
}

/// One pass of ingest -> filter -> cluster -> tier -> dispatch, repeated on a
/// fixed interval. Cycles never overlap; a late tick is skipped.
pub struct CheckCycle {
    connectors: Vec<Arc<dyn ExchangeConnector>>,
    retry: RetryPolicy,
    min_volume: f64,
    engine: ClusteringEngine,
    signals: SignalReader,
    thresholds: TierThresholds,
    dispatcher: Dispatcher,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl CheckCycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connectors: Vec<Arc<dyn ExchangeConnector>>,
        retry: RetryPolicy,
        min_volume: f64,
        engine: ClusteringEngine,
        signals: SignalReader,
        thresholds: TierThresholds,
        dispatcher: Dispatcher,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self { connectors, retry, min_volume, engine, signals, thresholds, dispatcher, health, latency }
    }

    /// First cycle runs immediately.
    pub async fn run(self, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.run_once(Utc::now()).await;
        }
    }

    pub async fn run_once(&self, cycle_at: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let mut markets = Vec::new();
        for connector in &self.connectors {
            let outcome = fetch_markets(Arc::clone(connector), &self.retry).await;
            report.fetched.insert(outcome.exchange, outcome.markets.len());
            if outcome.truncated {
                report.truncated.push(outcome.exchange);
            }
            report.fetch_failures.extend(outcome.failures);
            markets.extend(outcome.markets);
        }

        let markets = filter_by_volume(markets, self.min_volume);
        report.kept_after_filter = markets.len();

        let clustered = self.engine.cluster(markets, cycle_at).await;
        report.events = clustered.events.len();
        report.irrelevant = clustered.irrelevant;
        report.unclassified = clustered.unclassified;

        let mut classified: Vec<ClassifiedEvent> = Vec::with_capacity(clustered.events.len());
        for mut event in clustered.events {
            if let Err(e) = self.signals.annotate(&mut event, cycle_at).await {
                warn!(event_id = %event.id, "[CYCLE] volume history unavailable, tiering without it: {e}");
                report.history_failures += 1;
            }
            let tier = classify(&event, &self.thresholds);
            classified.push(ClassifiedEvent { event, tier });
        }
        for ce in &classified {
            *report.tiers.entry(ce.tier).or_insert(0) += 1;
        }

        report.dispatch = self.dispatcher.dispatch(&classified, cycle_at).await;

        let elapsed = started.elapsed();
        self.latency.record(elapsed);
        self.health.record_cycle(cycle_at.timestamp(), report.events, report.degraded());
        log_summary(&report, elapsed);
        report
    }
}

fn log_summary(report: &CycleReport, elapsed: Duration) {
    let fetched: usize = report.fetched.values().sum();
    info!(
        event = "CHECK_CYCLE",
        fetched,
        kept = report.kept_after_filter,
        events = report.events,
        urgent = report.tier_count(Tier::Urgent),
        hot = report.tier_count(Tier::Hot),
        normal = report.tier_count(Tier::Normal),
        ignored = report.tier_count(Tier::Ignored),
        irrelevant = report.irrelevant,
        history_failures = report.history_failures,
        snapshots = report.dispatch.snapshots_written,
        alerts = report.dispatch.alerts_queued,
        digests = report.dispatch.digests_queued,
        degraded = report.degraded(),
        elapsed_ms = elapsed.as_millis() as u64,
        "[CYCLE] {fetched} fetched, {} after volume filter, {} events",
        report.kept_after_filter,
        report.events,
    );

    if report.events == 0 {
        warn!(
            fetch_failures = report.fetch_failures.len(),
            unclassified = report.unclassified.len(),
            "[CYCLE] no events this cycle"
        );
        for f in &report.fetch_failures {
            warn!(exchange = %f.exchange, page = f.page, "[CYCLE] fetch error: {}", f.error);
        }
        for (fp, err) in &report.unclassified {
            warn!(fingerprint = %fp, "[CYCLE] classification error: {err}");
        }
    }
}
