//! Relevance decisions keyed by topic fingerprint, cached in memory and in
//! `topic_cache` so each fingerprint is classified at most once.

pub mod classifier;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::db::models::TopicCacheRow;
use crate::db::Store;
use crate::error::Result;
use crate::types::{RawMarket, RelevanceDecision, TopicTier};

pub use classifier::{KeywordClassifier, OpenAiClassifier, RelevanceClassifier};

const STOP_WORDS: &[&str] = &[
    "will", "the", "a", "an", "be", "to", "of", "in", "on", "by", "for", "at", "is", "does", "do",
];

/// Order-independent topic key for a market title: lowercase alphanumeric
/// tokens minus stop words, deduplicated, sorted, space-joined. Titles with no
/// usable tokens fall back to `<exchange>:<market id>`.
pub fn fingerprint(market: &RawMarket) -> String {
    let lower = market.title.to_lowercase();
    let mut tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .collect();
    tokens.sort_unstable();
    tokens.dedup();

    if tokens.is_empty() {
        format!("{}:{}", market.exchange, market.market_id)
    } else {
        tokens.join(" ")
    }
}

#[derive(Debug, Clone)]
struct CachedDecision {
    decision: RelevanceDecision,
    cached_at: i64,
}

/// Two-layer cache: a process-lifetime map in front of the `topic_cache` table.
/// Persistence failures degrade to memory-only; they are never fatal.
pub struct RelevanceCache {
    store: Store,
    memory: DashMap<String, CachedDecision>,
}

impl RelevanceCache {
    pub fn new(store: Store) -> Self {
        Self { store, memory: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub async fn lookup(&self, fingerprint: &str) -> Option<RelevanceDecision> {
        if let Some(hit) = self.memory.get(fingerprint) {
            return Some(hit.decision.clone());
        }

        match self.store.get_topic(fingerprint).await {
            Ok(Some(row)) => {
                let Some(topic_tier) = TopicTier::parse(&row.topic_tier) else {
                    warn!(fingerprint, tier = %row.topic_tier, "[RELEVANCE] bad cached tier, treating as miss");
                    return None;
                };
                let decision = RelevanceDecision {
                    is_relevant: row.is_relevant,
                    topic_tier,
                    reasoning: row.reasoning,
                };
                self.memory.insert(
                    fingerprint.to_string(),
                    CachedDecision { decision: decision.clone(), cached_at: row.cached_at },
                );
                Some(decision)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(fingerprint, "[RELEVANCE] cache lookup failed, treating as miss: {e}");
                None
            }
        }
    }

    pub async fn store(&self, fingerprint: &str, decision: &RelevanceDecision, now: i64) {
        self.memory.insert(
            fingerprint.to_string(),
            CachedDecision { decision: decision.clone(), cached_at: now },
        );

        let row = TopicCacheRow {
            fingerprint: fingerprint.to_string(),
            is_relevant: decision.is_relevant,
            topic_tier: decision.topic_tier.to_string(),
            reasoning: decision.reasoning.clone(),
            cached_at: now,
        };
        if let Err(e) = self.store.upsert_topic(&row).await {
            warn!(fingerprint, "[RELEVANCE] failed to persist decision: {e}");
        }
    }

    /// Cached decision for `fingerprint`, classifying `topic` on a miss.
    pub async fn resolve(
        &self,
        fingerprint: &str,
        topic: &str,
        classifier: &dyn RelevanceClassifier,
        now: i64,
    ) -> Result<RelevanceDecision> {
        if let Some(decision) = self.lookup(fingerprint).await {
            return Ok(decision);
        }

        let decision = classifier.classify(topic).await?;
        debug!(
            fingerprint,
            classifier = classifier.name(),
            relevant = decision.is_relevant,
            tier = %decision.topic_tier,
            "[RELEVANCE] classified"
        );
        self.store(fingerprint, &decision, now).await;
        Ok(decision)
    }

    /// Drop entries with `cached_at <= cutoff` from both layers.
    pub async fn purge_older_than(&self, cutoff: i64, batch: u32) -> Result<u64> {
        self.memory.retain(|_, entry| entry.cached_at > cutoff);
        self.store.purge_topics(cutoff, batch).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::db::test_pool;
    use crate::error::AppError;
    use crate::types::Exchange;

    /// Wraps the keyword classifier and counts calls. Topics containing
    /// "unclassifiable" fail.
    #[derive(Default)]
    pub(crate) struct CountingClassifier {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceClassifier for CountingClassifier {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn classify(&self, topic: &str) -> Result<RelevanceDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if topic.to_lowercase().contains("unclassifiable") {
                return Err(AppError::Classification("classifier unavailable".to_string()));
            }
            KeywordClassifier.classify(topic).await
        }
    }

    fn market(title: &str) -> RawMarket {
        RawMarket {
            exchange: Exchange::Kalshi,
            market_id: "KX-1".to_string(),
            title: title.to_string(),
            volume: 0.0,
            yes_price: None,
            close_time: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn fingerprint_ignores_order_case_and_stop_words() {
        let a = fingerprint(&market("Will the Fed cut rates in December?"));
        let b = fingerprint(&market("December: Fed to CUT rates"));
        assert_eq!(a, "cut december fed rates");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_dedupes_tokens() {
        assert_eq!(fingerprint(&market("Trump vs Trump")), "trump vs");
    }

    #[test]
    fn fingerprint_falls_back_to_market_key() {
        assert_eq!(fingerprint(&market("Will the?")), "kalshi:KX-1");
        assert_eq!(fingerprint(&market("")), "kalshi:KX-1");
    }

    #[tokio::test]
    async fn resolve_classifies_each_fingerprint_once() {
        let cache = RelevanceCache::new(Store::new(test_pool().await));
        let classifier = CountingClassifier::default();

        let first = cache.resolve("cut fed rates", "Fed cut rates?", &classifier, 100).await.unwrap();
        let second = cache.resolve("cut fed rates", "Fed cut rates?", &classifier, 200).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persisted_decision_survives_a_fresh_memory_layer() {
        let store = Store::new(test_pool().await);
        let classifier = CountingClassifier::default();

        RelevanceCache::new(store.clone())
            .resolve("super bowl", "Super Bowl winner?", &classifier, 100)
            .await
            .unwrap();

        let restarted = RelevanceCache::new(store);
        let hit = restarted.lookup("super bowl").await.unwrap();
        assert_eq!(hit.topic_tier, TopicTier::S);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classification_failure_is_not_cached() {
        let cache = RelevanceCache::new(Store::new(test_pool().await));
        let classifier = CountingClassifier::default();

        assert!(cache.resolve("x", "Unclassifiable thing", &classifier, 1).await.is_err());
        assert!(cache.lookup("x").await.is_none());
    }

    #[tokio::test]
    async fn store_failure_still_caches_in_memory() {
        let store = Store::new(test_pool().await);
        sqlx::query("DROP TABLE topic_cache").execute(store.pool()).await.unwrap();
        let cache = RelevanceCache::new(store);
        let classifier = CountingClassifier::default();

        cache.resolve("nba finals", "NBA Finals?", &classifier, 1).await.unwrap();
        cache.resolve("nba finals", "NBA Finals?", &classifier, 2).await.unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn purge_drops_memory_and_rows_at_or_before_cutoff() {
        let cache = RelevanceCache::new(Store::new(test_pool().await));
        let decision = RelevanceDecision { is_relevant: true, topic_tier: TopicTier::A, reasoning: String::new() };
        cache.store("old", &decision, 100).await;
        cache.store("edge", &decision, 200).await;
        cache.store("young", &decision, 201).await;

        let deleted = cache.purge_older_than(200, 10).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("old").await.is_none());
        assert!(cache.lookup("young").await.is_some());
    }
}
