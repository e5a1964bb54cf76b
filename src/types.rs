use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Exchange + RawMarket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Kalshi,
    Polymarket,
}

impl Exchange {
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Exchange::Kalshi => "KALSHI",
            Exchange::Polymarket => "POLYMARKET",
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Exchange::Kalshi => "kalshi",
            Exchange::Polymarket => "polymarket",
        };
        write!(f, "{s}")
    }
}

/// One listing as normalized at the connector boundary. Lives for one check cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawMarket {
    pub exchange: Exchange,
    pub market_id: String,
    pub title: String,
    pub volume: f64,
    /// Yes-outcome probability in [0, 1], when the exchange reports one.
    pub yes_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Relevance decisions
// ---------------------------------------------------------------------------

/// Content-value grade assigned by the relevance classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicTier {
    /// A-list topic with high search demand.
    S,
    /// Popular but not top-tier.
    A,
    /// Niche or unknown.
    C,
}

impl TopicTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Some(TopicTier::S),
            "A" => Some(TopicTier::A),
            "C" => Some(TopicTier::C),
            _ => None,
        }
    }
}

impl std::fmt::Display for TopicTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TopicTier::S => "S",
            TopicTier::A => "A",
            TopicTier::C => "C",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceDecision {
    pub is_relevant: bool,
    pub topic_tier: TopicTier,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Event (cluster)
// ---------------------------------------------------------------------------

/// Time-dependent inputs to tiering, filled in by the cycle before classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EventSignals {
    /// Primary-market volume growth against a snapshot about an hour old, as a
    /// ratio (1.0 means doubled).
    pub volume_growth_1h: Option<f64>,
    /// Same against a snapshot about six hours old.
    pub volume_growth_6h: Option<f64>,
    /// Days until `closes_at`; negative once closed.
    pub days_to_close: Option<f64>,
}

/// Markets judged to represent the same question, built fresh every cycle.
/// `members[0]` is the primary market; the rest follow in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub members: Vec<RawMarket>,
    pub topic: RelevanceDecision,
    pub total_volume: f64,
    /// max - min yes price over priced members; 0.0 with fewer than two.
    pub price_dispersion: f64,
    /// Soonest close time among members.
    pub closes_at: Option<DateTime<Utc>>,
    pub signals: EventSignals,
}

impl Event {
    /// Build an Event from members already sorted by rank. Returns None for an
    /// empty group so a zero-member Event can never exist.
    pub fn from_ranked(id: String, members: Vec<RawMarket>, topic: RelevanceDecision) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        let total_volume = members.iter().map(|m| m.volume).sum();

        let prices: Vec<f64> = members.iter().filter_map(|m| m.yes_price).collect();
        let price_dispersion = if prices.len() < 2 {
            0.0
        } else {
            let max = prices.iter().copied().fold(f64::MIN, f64::max);
            let min = prices.iter().copied().fold(f64::MAX, f64::min);
            max - min
        };

        let closes_at = members.iter().filter_map(|m| m.close_time).min();

        Some(Self {
            id,
            members,
            topic,
            total_volume,
            price_dispersion,
            closes_at,
            signals: EventSignals::default(),
        })
    }

    pub fn primary(&self) -> &RawMarket {
        &self.members[0]
    }

    /// Distinct exchanges covering this Event, sorted.
    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut out: Vec<Exchange> = self.members.iter().map(|m| m.exchange).collect();
        out.sort();
        out.dedup();
        out
    }
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Urgency classification. Ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Ignored,
    Normal,
    Hot,
    Urgent,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Ignored => "ignored",
            Tier::Normal => "normal",
            Tier::Hot => "hot",
            Tier::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedEvent {
    pub event: Event,
    pub tier: Tier,
}

// ---------------------------------------------------------------------------
// Persisted kinds
// ---------------------------------------------------------------------------

/// How a queued notification should be delivered by the external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Immediate,
    Digest,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Immediate => "immediate",
            Delivery::Digest => "digest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "immediate" => Some(Delivery::Immediate),
            "digest" => Some(Delivery::Digest),
            _ => None,
        }
    }
}

impl std::fmt::Display for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted entity kinds, used to tag per-kind failures and purge outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    MarketSnapshot,
    AlertLog,
    DigestQueue,
    TopicCache,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::MarketSnapshot => "market_snapshot",
            EntityKind::AlertLog => "alert_log",
            EntityKind::DigestQueue => "digest_queue",
            EntityKind::TopicCache => "topic_cache",
        };
        write!(f, "{s}")
    }
}
