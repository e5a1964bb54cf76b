use crate::error::{AppError, Result};
use crate::types::{Event, EventSignals, Tier, TopicTier};

#[derive(Debug, Clone)]
pub struct TierThresholds {
    pub urgent_min_volume: f64,
    pub urgent_min_dispersion: f64,
    pub hot_min_volume: f64,
    pub hot_min_dispersion: f64,
    /// 1h volume growth that makes any topic urgent.
    pub urgent_min_growth_1h: f64,
    /// 1h volume growth that makes an S-tier topic urgent.
    pub s_tier_urgent_min_growth_1h: f64,
    /// 6h volume growth that makes a topic hot.
    pub hot_min_growth_6h: f64,
    /// S-tier topics closing within this many days are urgent.
    pub urgent_close_window_days: f64,
    /// Topics closing within this many days are hot.
    pub hot_close_window_days: f64,
    /// Minimum total volume for an Event to matter at all, per topic tier.
    pub topic_min_volume_s: f64,
    pub topic_min_volume_a: f64,
    pub topic_min_volume_c: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            urgent_min_volume: 500_000.0,
            urgent_min_dispersion: 0.10,
            hot_min_volume: 250_000.0,
            hot_min_dispersion: 0.05,
            urgent_min_growth_1h: 3.0,
            s_tier_urgent_min_growth_1h: 1.0,
            hot_min_growth_6h: 2.0,
            urgent_close_window_days: 1.0,
            hot_close_window_days: 7.0,
            topic_min_volume_s: 100_000.0,
            topic_min_volume_a: 250_000.0,
            topic_min_volume_c: 500_000.0,
        }
    }
}

impl TierThresholds {
    pub fn topic_min_volume(&self, tier: TopicTier) -> f64 {
        match tier {
            TopicTier::S => self.topic_min_volume_s,
            TopicTier::A => self.topic_min_volume_a,
            TopicTier::C => self.topic_min_volume_c,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let all = [
            ("URGENT_MIN_VOLUME", self.urgent_min_volume),
            ("URGENT_MIN_DISPERSION", self.urgent_min_dispersion),
            ("HOT_MIN_VOLUME", self.hot_min_volume),
            ("HOT_MIN_DISPERSION", self.hot_min_dispersion),
            ("URGENT_MIN_GROWTH_1H", self.urgent_min_growth_1h),
            ("S_TIER_URGENT_MIN_GROWTH_1H", self.s_tier_urgent_min_growth_1h),
            ("HOT_MIN_GROWTH_6H", self.hot_min_growth_6h),
            ("URGENT_CLOSE_WINDOW_DAYS", self.urgent_close_window_days),
            ("HOT_CLOSE_WINDOW_DAYS", self.hot_close_window_days),
            ("TOPIC_MIN_VOLUME_S", self.topic_min_volume_s),
            ("TOPIC_MIN_VOLUME_A", self.topic_min_volume_a),
            ("TOPIC_MIN_VOLUME_C", self.topic_min_volume_c),
        ];
        for (name, value) in all {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Config(format!("{name} must be a non-negative number, got {value}")));
            }
        }
        if self.urgent_min_volume < self.hot_min_volume {
            return Err(AppError::Config("URGENT_MIN_VOLUME must be >= HOT_MIN_VOLUME".to_string()));
        }
        if self.urgent_min_dispersion < self.hot_min_dispersion {
            return Err(AppError::Config("URGENT_MIN_DISPERSION must be >= HOT_MIN_DISPERSION".to_string()));
        }
        Ok(())
    }
}

/// Tier an Event from its total volume, price dispersion, topic tier and
/// time signals. Raising a minimum or narrowing a close window never raises
/// the tier of fixed signals.
pub fn classify(event: &Event, t: &TierThresholds) -> Tier {
    classify_signals(event.total_volume, event.price_dispersion, event.topic.topic_tier, &event.signals, t)
}

fn classify_signals(volume: f64, dispersion: f64, topic: TopicTier, signals: &EventSignals, t: &TierThresholds) -> Tier {
    if volume < t.topic_min_volume(topic) {
        return Tier::Ignored;
    }

    let growth_1h = |min: f64| signals.volume_growth_1h.is_some_and(|g| g >= min);
    let growth_6h = |min: f64| signals.volume_growth_6h.is_some_and(|g| g >= min);
    let closes_within = |days: f64| signals.days_to_close.is_some_and(|d| d >= 0.0 && d <= days);

    let urgent = (volume >= t.urgent_min_volume && dispersion >= t.urgent_min_dispersion)
        || growth_1h(t.urgent_min_growth_1h)
        || (topic == TopicTier::S
            && (growth_1h(t.s_tier_urgent_min_growth_1h) || closes_within(t.urgent_close_window_days)));
    if urgent {
        return Tier::Urgent;
    }

    let hot = (volume >= t.hot_min_volume && dispersion >= t.hot_min_dispersion)
        || growth_6h(t.hot_min_growth_6h)
        || closes_within(t.hot_close_window_days);
    if hot {
        Tier::Hot
    } else {
        Tier::Normal
    }
}
