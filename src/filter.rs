use crate::types::RawMarket;

/// Keep markets with `volume >= min_volume`, preserving input order.
/// NaN volumes never pass.
pub fn filter_by_volume(markets: Vec<RawMarket>, min_volume: f64) -> Vec<RawMarket> {
    markets.into_iter().filter(|m| m.volume >= min_volume).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exchange;

    fn market(id: &str, volume: f64) -> RawMarket {
        RawMarket {
            exchange: Exchange::Polymarket,
            market_id: id.to_string(),
            title: format!("Market {id}"),
            volume,
            yes_price: None,
            close_time: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn drops_low_volume_and_keeps_order() {
        let markets = vec![market("a", 50_000.0), market("b", 150_000.0), market("c", 200_000.0)];
        let kept = filter_by_volume(markets, 100_000.0);
        let ids: Vec<&str> = kept.iter().map(|m| m.market_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        let volumes: Vec<f64> = kept.iter().map(|m| m.volume).collect();
        assert_eq!(volumes, vec![150_000.0, 200_000.0]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let kept = filter_by_volume(vec![market("edge", 100_000.0), market("under", 99_999.99)], 100_000.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].market_id, "edge");
    }

    #[test]
    fn nan_volume_is_dropped() {
        assert!(filter_by_volume(vec![market("nan", f64::NAN)], 0.0).is_empty());
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(filter_by_volume(Vec::new(), 100_000.0).is_empty());
    }
}
