//! Shared health state for the /health endpoint.
//! Updated by the check-cycle runner and the retention scheduler.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Shared health metrics. Written by background tasks, read by the API.
#[derive(Default)]
pub struct HealthState {
    cycles_run: AtomicU64,
    /// Unix seconds of the last finished check cycle (0 = none yet).
    last_cycle_at: AtomicI64,
    last_cycle_events: AtomicU64,
    /// True when the last cycle had fetch, classification or dispatch failures.
    last_cycle_degraded: AtomicBool,
    /// Unix seconds of the last retention run (0 = none yet).
    last_cleanup_at: AtomicI64,
    last_cleanup_deleted: AtomicU64,
    last_cleanup_failed_kinds: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub cycles_run: u64,
    pub last_cycle_at: Option<i64>,
    pub last_cycle_events: u64,
    pub last_cycle_degraded: bool,
    pub last_cleanup_at: Option<i64>,
    pub last_cleanup_deleted: u64,
    pub last_cleanup_failed_kinds: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, at: i64, events: usize, degraded: bool) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_at.store(at, Ordering::Relaxed);
        self.last_cycle_events.store(events as u64, Ordering::Relaxed);
        self.last_cycle_degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn record_cleanup(&self, at: i64, deleted: u64, failed_kinds: usize) {
        self.last_cleanup_at.store(at, Ordering::Relaxed);
        self.last_cleanup_deleted.store(deleted, Ordering::Relaxed);
        self.last_cleanup_failed_kinds.store(failed_kinds as u64, Ordering::Relaxed);
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let nonzero = |v: i64| (v > 0).then_some(v);
        let degraded = self.last_cycle_degraded.load(Ordering::Relaxed);
        let cleanup_failed = self.last_cleanup_failed_kinds.load(Ordering::Relaxed);
        let cycles_run = self.cycles_run();
        let status = match (cycles_run, degraded || cleanup_failed > 0) {
            (0, _) => "starting",
            (_, true) => "degraded",
            _ => "ok",
        };
        HealthSnapshot {
            status,
            cycles_run,
            last_cycle_at: nonzero(self.last_cycle_at.load(Ordering::Relaxed)),
            last_cycle_events: self.last_cycle_events.load(Ordering::Relaxed),
            last_cycle_degraded: degraded,
            last_cleanup_at: nonzero(self.last_cleanup_at.load(Ordering::Relaxed)),
            last_cleanup_deleted: self.last_cleanup_deleted.load(Ordering::Relaxed),
            last_cleanup_failed_kinds: cleanup_failed,
        }
    }
}
