//! In-memory histogram of check-cycle wall-clock durations.

use std::sync::Mutex;
use std::time::Duration;

/// Shared cycle duration stats. The cycle runner records, the API reads.
/// Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(
                hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3).expect("valid histogram bounds"),
            ),
        }
    }

    pub fn record_ms(&self, ms: u64) {
        if let Ok(mut h) = self.inner.lock() {
            h.saturating_record(ms);
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.record_ms(ms);
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        let Ok(h) = self.inner.lock() else {
            return (None, None, None);
        };
        if h.len() == 0 {
            return (None, None, None);
        }
        (
            Some(h.value_at_quantile(0.5)),
            Some(h.value_at_quantile(0.95)),
            Some(h.value_at_quantile(0.99)),
        )
    }

    pub fn len(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlong_cycle_is_clamped_not_dropped() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_secs(10_000));
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn empty_histogram_has_no_percentiles() {
        assert_eq!(LatencyStats::new().percentiles(), (None, None, None));
    }

    #[test]
    fn percentiles_follow_samples() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let (p50, p95, p99) = stats.percentiles();
        assert_eq!(stats.len(), 100);
        assert!((49..=51).contains(&p50.unwrap()));
        assert!((94..=96).contains(&p95.unwrap()));
        assert!((98..=100).contains(&p99.unwrap()));
    }
}
