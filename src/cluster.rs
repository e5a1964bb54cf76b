use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::relevance::{fingerprint, RelevanceCache, RelevanceClassifier};
use crate::types::{Event, RawMarket};

#[derive(Debug, Default)]
pub struct ClusterOutcome {
    /// Relevant Events in fingerprint order.
    pub events: Vec<Event>,
    /// Groups dropped because the topic was judged not relevant.
    pub irrelevant: usize,
    /// Groups dropped because classification failed: (fingerprint, error).
    pub unclassified: Vec<(String, String)>,
}

/// Groups markets into Events by topic fingerprint and drops irrelevant topics.
pub struct ClusteringEngine {
    cache: Arc<RelevanceCache>,
    classifier: Arc<dyn RelevanceClassifier>,
}

impl ClusteringEngine {
    pub fn new(cache: Arc<RelevanceCache>, classifier: Arc<dyn RelevanceClassifier>) -> Self {
        Self { cache, classifier }
    }

    pub async fn cluster(&self, markets: Vec<RawMarket>, now: DateTime<Utc>) -> ClusterOutcome {
        let mut outcome = ClusterOutcome::default();

        for (fp, members) in group_by_fingerprint(markets) {
            // Groups are never empty by construction; members are already ranked.
            let topic = members[0].title.clone();
            match self
                .cache
                .resolve(&fp, &topic, self.classifier.as_ref(), now.timestamp())
                .await
            {
                Ok(decision) if decision.is_relevant => {
                    if let Some(event) = Event::from_ranked(fp, members, decision) {
                        outcome.events.push(event);
                    }
                }
                Ok(decision) => {
                    debug!(fingerprint = %fp, reason = %decision.reasoning, "[CLUSTER] topic not relevant");
                    outcome.irrelevant += 1;
                }
                Err(e) => {
                    warn!(fingerprint = %fp, "[CLUSTER] classification failed, group excluded: {e}");
                    outcome.unclassified.push((fp, e.to_string()));
                }
            }
        }

        outcome
    }
}

/// Fingerprint → members sorted by rank. BTreeMap keeps group order deterministic.
pub fn group_by_fingerprint(markets: Vec<RawMarket>) -> BTreeMap<String, Vec<RawMarket>> {
    let mut groups: BTreeMap<String, Vec<RawMarket>> = BTreeMap::new();
    for market in markets {
        groups.entry(fingerprint(&market)).or_default().push(market);
    }
    for members in groups.values_mut() {
        members.sort_by(rank);
    }
    groups
}

/// Primary-market order: volume desc, close time desc (missing last),
/// market id asc, exchange asc.
pub fn rank(a: &RawMarket, b: &RawMarket) -> Ordering {
    b.volume
        .total_cmp(&a.volume)
        .then_with(|| match (a.close_time, b.close_time) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.market_id.cmp(&b.market_id))
        .then_with(|| a.exchange.cmp(&b.exchange))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering as AtomicOrdering;

    use chrono::TimeZone;

    use crate::db::{test_pool, Store};
    use crate::relevance::tests::CountingClassifier;
    use crate::types::{Exchange, TopicTier};

    fn market(exchange: Exchange, id: &str, title: &str, volume: f64, yes_price: Option<f64>) -> RawMarket {
        RawMarket {
            exchange,
            market_id: id.to_string(),
            title: title.to_string(),
            volume,
            yes_price,
            close_time: None,
            tags: Vec::new(),
        }
    }

    async fn engine() -> (ClusteringEngine, Arc<CountingClassifier>) {
        let cache = Arc::new(RelevanceCache::new(Store::new(test_pool().await)));
        let classifier = Arc::new(CountingClassifier::default());
        (ClusteringEngine::new(cache, classifier.clone()), classifier)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn cross_exchange_markets_form_one_event() {
        let (engine, classifier) = engine().await;
        let markets = vec![
            market(Exchange::Kalshi, "KXFED", "Will the Fed cut rates in December?", 300_000.0, Some(0.40)),
            market(Exchange::Polymarket, "0xfed", "Fed cut rates in December", 400_000.0, Some(0.55)),
        ];

        let outcome = engine.cluster(markets, now()).await;
        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.members.len(), 2);
        assert_eq!(event.primary().market_id, "0xfed");
        assert_eq!(event.total_volume, 700_000.0);
        assert!((event.price_dispersion - 0.15).abs() < 1e-9);
        assert_eq!(event.exchanges(), vec![Exchange::Kalshi, Exchange::Polymarket]);
        assert_eq!(classifier.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn singleton_event_has_zero_dispersion() {
        let (engine, _) = engine().await;
        let outcome = engine
            .cluster(vec![market(Exchange::Kalshi, "KX1", "NBA Finals MVP", 900_000.0, Some(0.3))], now())
            .await;
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].price_dispersion, 0.0);
        assert_eq!(outcome.events[0].topic.topic_tier, TopicTier::S);
    }

    #[tokio::test]
    async fn irrelevant_and_unclassified_groups_are_excluded() {
        let (engine, _) = engine().await;
        let markets = vec![
            market(Exchange::Kalshi, "W1", "NYC snowfall over 30 inches?", 900_000.0, None),
            market(Exchange::Polymarket, "U1", "Unclassifiable mystery market", 900_000.0, None),
            market(Exchange::Polymarket, "R1", "Will the Fed cut rates?", 900_000.0, None),
        ];

        let outcome = engine.cluster(markets, now()).await;
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].primary().market_id, "R1");
        assert_eq!(outcome.irrelevant, 1);
        assert_eq!(outcome.unclassified.len(), 1);
        assert_eq!(outcome.unclassified[0].0, "market mystery unclassifiable");
    }

    #[tokio::test]
    async fn output_is_deterministic_regardless_of_input_order() {
        let (engine, _) = engine().await;
        let markets = vec![
            market(Exchange::Kalshi, "A", "Super Bowl winner", 200_000.0, Some(0.2)),
            market(Exchange::Polymarket, "B", "Winner Super Bowl", 200_000.0, Some(0.3)),
            market(Exchange::Kalshi, "C", "Oscars best picture", 150_000.0, None),
        ];
        let mut reversed = markets.clone();
        reversed.reverse();

        let first = engine.cluster(markets, now()).await;
        let second = engine.cluster(reversed, now()).await;
        assert_eq!(first.events, second.events);
        let ids: Vec<&str> = first.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["best oscars picture", "bowl super winner"]);
        assert_eq!(first.events[1].primary().market_id, "A");
    }

    #[test]
    fn rank_breaks_ties_by_close_time_then_id_then_exchange() {
        let early = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap();

        let mut a = market(Exchange::Polymarket, "a", "t", 100.0, None);
        let mut b = market(Exchange::Kalshi, "b", "t", 100.0, None);
        a.close_time = Some(early);
        b.close_time = Some(late);
        assert_eq!(rank(&b, &a), Ordering::Less);

        let undated = market(Exchange::Kalshi, "0", "t", 100.0, None);
        assert_eq!(rank(&a, &undated), Ordering::Less);

        let x = market(Exchange::Polymarket, "same", "t", 100.0, None);
        let y = market(Exchange::Kalshi, "same", "t", 100.0, None);
        assert_eq!(rank(&y, &x), Ordering::Less);

        let big = market(Exchange::Polymarket, "z", "t", 101.0, None);
        assert_eq!(rank(&big, &b), Ordering::Less);
    }
}
