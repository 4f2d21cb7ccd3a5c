//! # Running Stats
//!
//! Incremental min / max / average over every accepted sample of the
//! process lifetime. There is no reset and no decay.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunningStats {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub sum: u64,
    pub count: u64,
    /// `sum / count` rounded to one decimal.
    #[serde(rename = "avg")]
    pub average: Option<f64>,
    pub last: Option<u32>,
}

/// Sole writer of [`RunningStats`].
#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: RunningStats,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one validated sample value into the stats.
    pub fn update(&mut self, value: u32) -> &RunningStats {
        let stats = &mut self.stats;
        stats.last = Some(value);
        stats.min = Some(stats.min.map_or(value, |min| min.min(value)));
        stats.max = Some(stats.max.map_or(value, |max| max.max(value)));
        stats.sum += u64::from(value);
        stats.count += 1;
        stats.average = Some(round_one_decimal(stats.sum as f64 / stats.count as f64));
        stats
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_are_unset() {
        let aggregator = StatsAggregator::new();
        let stats = aggregator.stats();
        assert_eq!(stats.min, None);
        assert_eq!(stats.max, None);
        assert_eq!(stats.average, None);
        assert_eq!(stats.last, None);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.sum, 0);
    }

    #[test]
    fn folds_min_max_average() {
        let mut aggregator = StatsAggregator::new();
        for value in [72, 88, 65, 90, 71] {
            aggregator.update(value);
        }

        let stats = aggregator.stats();
        assert_eq!(stats.min, Some(65));
        assert_eq!(stats.max, Some(90));
        assert_eq!(stats.last, Some(71));
        assert_eq!(stats.count, 5);
        assert_eq!(stats.sum, 386);
        assert_eq!(stats.average, Some(77.2));
    }

    #[test]
    fn average_rounds_to_one_decimal() {
        let mut aggregator = StatsAggregator::new();
        aggregator.update(70);
        aggregator.update(71);
        aggregator.update(71);
        // 212 / 3 = 70.666...
        assert_eq!(aggregator.stats().average, Some(70.7));
    }

    #[test]
    fn average_stays_between_min_and_max() {
        let sequences: [&[u32]; 4] = [&[60], &[60, 61], &[0, 300, 150, 1], &[99, 100, 100, 100, 100, 100, 100]];
        for seq in sequences {
            let mut aggregator = StatsAggregator::new();
            for &value in seq {
                aggregator.update(value);
            }
            let stats = aggregator.stats();
            let average = stats.average.unwrap();
            assert!(f64::from(stats.min.unwrap()) <= average, "{seq:?}");
            assert!(average <= f64::from(stats.max.unwrap()), "{seq:?}");
            assert_eq!(stats.count, seq.len() as u64);
            assert_eq!(stats.min, seq.iter().copied().min());
            assert_eq!(stats.max, seq.iter().copied().max());
        }
    }
}
