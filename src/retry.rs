//! Bounded retry with exponential backoff and full jitter for listing pages.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the backoff before `attempt + 1`: `min(max, base * 2^(attempt-1))`.
    pub fn backoff_cap_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let multiplier = if exponent >= 32 { u64::MAX } else { 1u64 << exponent };
        self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms)
    }

    /// Full jitter: uniform in `[0, cap)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let cap = self.backoff_cap_ms(attempt);
        if cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..cap)
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn retry_async<T, Fut, F>(policy: &RetryPolicy, op_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("retry op={op_name} succeeded after {attempt} attempts");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_transient() {
                    debug!("retry op={op_name} non-retryable error: {err}");
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    warn!("retry op={op_name} failed after {attempt} attempts: {err}");
                    return Err(err);
                }

                let backoff_ms = policy.backoff_ms(attempt);
                debug!("retry op={op_name} attempt={attempt} backoff_ms={backoff_ms} error={err}");
                if backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, base_delay_ms: 1, max_delay_ms: 5 }
    }

    fn timeout() -> AppError {
        AppError::Timeout { exchange: "polymarket".to_string(), page: 0, secs: 1 }
    }

    #[test]
    fn backoff_schedule_doubles_then_caps() {
        let policy = RetryPolicy { max_attempts: 10, base_delay_ms: 100, max_delay_ms: 1_500 };
        assert_eq!(policy.backoff_cap_ms(1), 100);
        assert_eq!(policy.backoff_cap_ms(2), 200);
        assert_eq!(policy.backoff_cap_ms(3), 400);
        assert_eq!(policy.backoff_cap_ms(4), 800);
        assert_eq!(policy.backoff_cap_ms(5), 1_500);
        assert_eq!(policy.backoff_cap_ms(40), 1_500);
    }

    #[test]
    fn jitter_stays_below_cap() {
        let policy = RetryPolicy { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 1_000 };
        for attempt in 1..6 {
            assert!(policy.backoff_ms(attempt) < policy.backoff_cap_ms(attempt));
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let mut calls = 0;
        let result = retry_async(&fast_policy(4), "test_op", || {
            calls += 1;
            let fail = calls < 3;
            async move {
                if fail {
                    Err(timeout())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_async(&fast_policy(3), "test_op", || {
            calls += 1;
            async { Err(timeout()) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn non_transient_fails_fast() {
        let mut calls = 0;
        let result: Result<()> = retry_async(&fast_policy(5), "test_op", || {
            calls += 1;
            async { Err(AppError::Payload("not an array".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
