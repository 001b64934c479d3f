use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// True/false positive/negative counts for predicted vs expected outputs
///
/// Derived metrics are recomputed from the counts on every read, and are
/// also written out so the annotation UI does not have to recompute them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConfusionStatsRepr", into = "ConfusionStatsRepr")]
pub struct ConfusionStats {
    pub true_positives: u64,
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

impl ConfusionStats {
    pub fn new(
        true_positives: u64,
        true_negatives: u64,
        false_positives: u64,
        false_negatives: u64,
    ) -> Self {
        Self {
            true_positives,
            true_negatives,
            false_positives,
            false_negatives,
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total_samples())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1_score(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        if precision + recall == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / (precision + recall)
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.true_negatives, self.true_negatives + self.false_positives)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl Add for ConfusionStats {
    type Output = ConfusionStats;

    fn add(self, other: ConfusionStats) -> ConfusionStats {
        ConfusionStats {
            true_positives: self.true_positives + other.true_positives,
            true_negatives: self.true_negatives + other.true_negatives,
            false_positives: self.false_positives + other.false_positives,
            false_negatives: self.false_negatives + other.false_negatives,
        }
    }
}

impl AddAssign for ConfusionStats {
    fn add_assign(&mut self, other: ConfusionStats) {
        *self = *self + other;
    }
}

impl fmt::Display for ConfusionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TP={} TN={} FP={} FN={} accuracy={:.3} precision={:.3} recall={:.3} f1={:.3}",
            self.true_positives,
            self.true_negatives,
            self.false_positives,
            self.false_negatives,
            self.accuracy(),
            self.precision(),
            self.recall(),
            self.f1_score()
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ConfusionStatsRepr {
    #[serde(default)]
    true_positives: u64,
    #[serde(default)]
    true_negatives: u64,
    #[serde(default)]
    false_positives: u64,
    #[serde(default)]
    false_negatives: u64,
    #[serde(default)]
    accuracy: f64,
    #[serde(default)]
    precision: f64,
    #[serde(default)]
    recall: f64,
    #[serde(default)]
    f1_score: f64,
    #[serde(default)]
    specificity: f64,
    #[serde(default)]
    total_samples: u64,
}

impl From<ConfusionStatsRepr> for ConfusionStats {
    fn from(repr: ConfusionStatsRepr) -> Self {
        ConfusionStats::new(
            repr.true_positives,
            repr.true_negatives,
            repr.false_positives,
            repr.false_negatives,
        )
    }
}

impl From<ConfusionStats> for ConfusionStatsRepr {
    fn from(stats: ConfusionStats) -> Self {
        ConfusionStatsRepr {
            true_positives: stats.true_positives,
            true_negatives: stats.true_negatives,
            false_positives: stats.false_positives,
            false_negatives: stats.false_negatives,
            accuracy: stats.accuracy(),
            precision: stats.precision(),
            recall: stats.recall(),
            f1_score: stats.f1_score(),
            specificity: stats.specificity(),
            total_samples: stats.total_samples(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let stats = ConfusionStats::new(6, 2, 1, 1);

        assert_eq!(stats.total_samples(), 10);
        assert!((stats.accuracy() - 0.8).abs() < 1e-9);
        assert!((stats.precision() - 6.0 / 7.0).abs() < 1e-9);
        assert!((stats.recall() - 6.0 / 7.0).abs() < 1e-9);
        assert!((stats.f1_score() - 6.0 / 7.0).abs() < 1e-9);
        assert!((stats.specificity() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominators() {
        let empty = ConfusionStats::default();
        assert_eq!(empty.accuracy(), 0.0);
        assert_eq!(empty.precision(), 0.0);
        assert_eq!(empty.recall(), 0.0);
        assert_eq!(empty.f1_score(), 0.0);
        assert_eq!(empty.specificity(), 0.0);
    }

    #[test]
    fn test_add() {
        let mut total = ConfusionStats::new(1, 0, 2, 0);
        total += ConfusionStats::new(3, 1, 0, 4);
        assert_eq!(total, ConfusionStats::new(4, 1, 2, 4));
    }

    #[test]
    fn test_serialized_form_includes_derived_metrics() {
        let value = serde_json::to_value(ConfusionStats::new(3, 0, 1, 0)).unwrap();
        assert_eq!(value["true_positives"], 3);
        assert_eq!(value["total_samples"], 4);
        assert_eq!(value["precision"], 0.75);
    }

    #[test]
    fn test_stale_derived_metrics_are_ignored_on_read() {
        let stats: ConfusionStats = serde_json::from_str(
            r#"{"true_positives":1,"true_negatives":0,"false_positives":1,
                "false_negatives":0,"accuracy":0.99}"#,
        )
        .unwrap();
        assert_eq!(stats.accuracy(), 0.5);
    }
}
