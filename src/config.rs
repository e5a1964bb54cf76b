use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;

use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;
use crate::tiering::TierThresholds;
use crate::types::Exchange;

pub const KALSHI_API_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";
pub const POLYMARKET_API_URL: &str = "https://gamma-api.polymarket.com";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// HTTP client timeout for classifier calls (seconds).
pub const CLASSIFIER_TIMEOUT_SECS: u64 = 30;

/// Per-exchange fetch limits. `workers` bounds pages in flight, which bounds
/// both peak memory and concurrent outbound connections for that exchange.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub exchange: Exchange,
    pub base_url: String,
    /// Hard cap on markets kept per fetch (*_MAX_MARKETS). Excess is truncated.
    pub max_markets: usize,
    /// Max pages in flight at once (*_WORKERS).
    pub workers: usize,
    /// Max pages requested per fetch (*_MAX_PAGES).
    pub max_pages: usize,
    /// Items requested per page (*_PAGE_SIZE).
    pub page_size: usize,
    /// Per-attempt page timeout (FETCH_PAGE_TIMEOUT_SECS).
    pub page_timeout: Duration,
}

/// Retention windows in days. `topic_cache_days = None` keeps cache entries forever.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub snapshot_days: u32,
    pub alert_log_days: u32,
    pub digest_days: u32,
    pub topic_cache_days: Option<u32>,
    /// Rows deleted per statement (RETENTION_BATCH_SIZE).
    pub batch_size: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            snapshot_days: 7,
            alert_log_days: 30,
            digest_days: 7,
            topic_cache_days: Some(30),
            batch_size: 5_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub kalshi: FetchLimits,
    pub polymarket: FetchLimits,
    pub retry: RetryPolicy,
    /// Markets below this volume never reach clustering (ABSOLUTE_MIN_VOLUME).
    pub absolute_min_volume: f64,
    pub thresholds: TierThresholds,
    /// Check-cycle period (CHECK_INTERVAL_MINUTES).
    pub check_interval: Duration,
    /// Daily cleanup time of day, UTC (CLEANUP_TIME, "HH:MM").
    pub cleanup_time: NaiveTime,
    pub retention: RetentionConfig,
    /// No repeat immediate alert for the same market within this window (ALERT_COOLDOWN_HOURS).
    pub alert_cooldown_hours: u32,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Absent variables take
    /// their defaults; present but invalid ones are configuration errors.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let page_timeout = Duration::from_secs(vars.parse("FETCH_PAGE_TIMEOUT_SECS", 20u64)?);

        let kalshi = FetchLimits {
            exchange: Exchange::Kalshi,
            base_url: vars.string("KALSHI_API_URL", KALSHI_API_URL),
            max_markets: vars.parse("KALSHI_MAX_MARKETS", 1_000usize)?,
            workers: vars.parse("KALSHI_WORKERS", 1usize)?,
            max_pages: vars.parse("KALSHI_MAX_PAGES", 10usize)?,
            page_size: vars.parse("KALSHI_PAGE_SIZE", 200usize)?,
            page_timeout,
        };
        let polymarket = FetchLimits {
            exchange: Exchange::Polymarket,
            base_url: vars.string("POLYMARKET_API_URL", POLYMARKET_API_URL),
            max_markets: vars.parse("POLYMARKET_MAX_MARKETS", 1_000usize)?,
            workers: vars.parse("POLYMARKET_WORKERS", 4usize)?,
            max_pages: vars.parse("POLYMARKET_MAX_PAGES", 20usize)?,
            page_size: vars.parse("POLYMARKET_PAGE_SIZE", 100usize)?,
            page_timeout,
        };

        let retry = RetryPolicy {
            max_attempts: vars.parse("RETRY_MAX_ATTEMPTS", 3u32)?,
            base_delay_ms: vars.parse("RETRY_BASE_DELAY_MS", 250u64)?,
            max_delay_ms: vars.parse("RETRY_MAX_DELAY_MS", 2_000u64)?,
        };

        let thresholds = TierThresholds {
            urgent_min_volume: vars.parse("URGENT_MIN_VOLUME", 500_000.0)?,
            urgent_min_dispersion: vars.parse("URGENT_MIN_DISPERSION", 0.10)?,
            hot_min_volume: vars.parse("HOT_MIN_VOLUME", 250_000.0)?,
            hot_min_dispersion: vars.parse("HOT_MIN_DISPERSION", 0.05)?,
            urgent_min_growth_1h: vars.parse("URGENT_MIN_GROWTH_1H", 3.0)?,
            s_tier_urgent_min_growth_1h: vars.parse("S_TIER_URGENT_MIN_GROWTH_1H", 1.0)?,
            hot_min_growth_6h: vars.parse("HOT_MIN_GROWTH_6H", 2.0)?,
            urgent_close_window_days: vars.parse("URGENT_CLOSE_WINDOW_DAYS", 1.0)?,
            hot_close_window_days: vars.parse("HOT_CLOSE_WINDOW_DAYS", 7.0)?,
            topic_min_volume_s: vars.parse("TOPIC_MIN_VOLUME_S", 100_000.0)?,
            topic_min_volume_a: vars.parse("TOPIC_MIN_VOLUME_A", 250_000.0)?,
            topic_min_volume_c: vars.parse("TOPIC_MIN_VOLUME_C", 500_000.0)?,
        };

        let cleanup_raw = vars.string("CLEANUP_TIME", "03:00");
        let cleanup_time = NaiveTime::parse_from_str(cleanup_raw.trim(), "%H:%M").map_err(|_| {
            AppError::Config(format!("CLEANUP_TIME must be HH:MM, got {cleanup_raw:?}"))
        })?;

        let topic_cache_days: u32 = vars.parse("TOPIC_CACHE_RETENTION_DAYS", 30u32)?;
        let retention = RetentionConfig {
            snapshot_days: vars.parse("SNAPSHOT_RETENTION_DAYS", 7u32)?,
            alert_log_days: vars.parse("ALERT_LOG_RETENTION_DAYS", 30u32)?,
            digest_days: vars.parse("DIGEST_RETENTION_DAYS", 7u32)?,
            topic_cache_days: (topic_cache_days > 0).then_some(topic_cache_days),
            batch_size: vars.parse("RETENTION_BATCH_SIZE", 5_000u32)?,
        };

        let cfg = Self {
            log_level: vars.string("LOG_LEVEL", "info"),
            db_path: vars.string("DB_PATH", "radar.db"),
            api_port: vars.parse("API_PORT", 3000u16)?,
            kalshi,
            polymarket,
            retry,
            absolute_min_volume: vars.parse("ABSOLUTE_MIN_VOLUME", 100_000.0)?,
            thresholds,
            check_interval: Duration::from_secs(60 * vars.parse("CHECK_INTERVAL_MINUTES", 30u64)?),
            cleanup_time,
            retention,
            alert_cooldown_hours: vars.parse("ALERT_COOLDOWN_HOURS", 6u32)?,
            openai_api_key: (vars.lookup)("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            openai_model: vars.string("OPENAI_MODEL", "gpt-4o-mini"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        for limits in [&self.kalshi, &self.polymarket] {
            let name = limits.exchange.env_prefix();
            if limits.max_markets == 0 {
                return Err(AppError::Config(format!("{name}_MAX_MARKETS must be > 0")));
            }
            if limits.workers == 0 {
                return Err(AppError::Config(format!("{name}_WORKERS must be > 0")));
            }
            if limits.max_pages == 0 {
                return Err(AppError::Config(format!("{name}_MAX_PAGES must be > 0")));
            }
            if limits.page_size == 0 {
                return Err(AppError::Config(format!("{name}_PAGE_SIZE must be > 0")));
            }
        }
        if self.kalshi.page_timeout.is_zero() {
            return Err(AppError::Config("FETCH_PAGE_TIMEOUT_SECS must be > 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be > 0".to_string()));
        }
        if !self.absolute_min_volume.is_finite() || self.absolute_min_volume < 0.0 {
            return Err(AppError::Config("ABSOLUTE_MIN_VOLUME must be a non-negative number".to_string()));
        }
        self.thresholds.validate()?;
        if self.check_interval.is_zero() {
            return Err(AppError::Config("CHECK_INTERVAL_MINUTES must be > 0".to_string()));
        }
        let windows = [
            ("SNAPSHOT_RETENTION_DAYS", self.retention.snapshot_days),
            ("ALERT_LOG_RETENTION_DAYS", self.retention.alert_log_days),
            ("DIGEST_RETENTION_DAYS", self.retention.digest_days),
        ];
        for (name, days) in windows {
            if days == 0 {
                return Err(AppError::Config(format!("{name} must be > 0")));
            }
        }
        if self.retention.batch_size == 0 {
            return Err(AppError::Config("RETENTION_BATCH_SIZE must be > 0".to_string()));
        }
        Ok(())
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match (self.lookup)(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config_with(&[]).unwrap();
        assert_eq!(cfg.check_interval, Duration::from_secs(30 * 60));
        assert_eq!(cfg.absolute_min_volume, 100_000.0);
        assert_eq!(cfg.cleanup_time, NaiveTime::from_hms_opt(3, 0, 0).unwrap());
        assert_eq!(cfg.retention.snapshot_days, 7);
        assert_eq!(cfg.retention.alert_log_days, 30);
        assert_eq!(cfg.retention.digest_days, 7);
        assert_eq!(cfg.retention.topic_cache_days, Some(30));
        assert_eq!(cfg.polymarket.workers, 4);
        assert_eq!(cfg.kalshi.workers, 1);
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config_with(&[
            ("POLYMARKET_WORKERS", "8"),
            ("CHECK_INTERVAL_MINUTES", "5"),
            ("CLEANUP_TIME", "23:45"),
            ("TOPIC_CACHE_RETENTION_DAYS", "0"),
            ("OPENAI_API_KEY", "sk-test"),
            ("HOT_CLOSE_WINDOW_DAYS", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.thresholds.hot_close_window_days, 3.0);
        assert_eq!(cfg.thresholds.urgent_min_growth_1h, 3.0);
        assert_eq!(cfg.polymarket.workers, 8);
        assert_eq!(cfg.check_interval, Duration::from_secs(300));
        assert_eq!(cfg.cleanup_time, NaiveTime::from_hms_opt(23, 45, 0).unwrap());
        assert_eq!(cfg.retention.topic_cache_days, None);
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn unparseable_value_is_config_error() {
        let err = config_with(&[("ABSOLUTE_MIN_VOLUME", "lots")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "got {err:?}");
    }

    #[test]
    fn zero_workers_rejected() {
        let err = config_with(&[("KALSHI_WORKERS", "0")]).unwrap_err();
        assert!(err.to_string().contains("KALSHI_WORKERS"), "got {err}");
    }

    #[test]
    fn zero_retention_window_rejected() {
        let err = config_with(&[("SNAPSHOT_RETENTION_DAYS", "0")]).unwrap_err();
        assert!(err.to_string().contains("SNAPSHOT_RETENTION_DAYS"), "got {err}");
    }

    #[test]
    fn urgent_below_hot_rejected() {
        let err = config_with(&[("URGENT_MIN_VOLUME", "1000"), ("HOT_MIN_VOLUME", "5000")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "got {err:?}");
    }

    #[test]
    fn malformed_cleanup_time_rejected() {
        let err = config_with(&[("CLEANUP_TIME", "3am")]).unwrap_err();
        assert!(err.to_string().contains("CLEANUP_TIME"), "got {err}");
    }
}
