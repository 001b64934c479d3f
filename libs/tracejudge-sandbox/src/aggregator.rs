// Verdict aggregation and output confusion statistics
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracejudge_common::stats::ConfusionStats;
use tracejudge_common::types::{markers, Verdict};

use anyhow::{ensure, Result};

/// Per-verdict counters for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub pass: u64,
    pub fail: u64,
    pub error: u64,
    pub timeout: u64,
}

impl VerdictCounts {
    pub fn add(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Pass => self.pass += 1,
            Verdict::Fail => self.fail += 1,
            Verdict::Error => self.error += 1,
            Verdict::Timeout => self.timeout += 1,
        }
    }

    pub fn get(&self, verdict: Verdict) -> u64 {
        match verdict {
            Verdict::Pass => self.pass,
            Verdict::Fail => self.fail,
            Verdict::Error => self.error,
            Verdict::Timeout => self.timeout,
        }
    }

    pub fn total(&self) -> u64 {
        self.pass + self.fail + self.error + self.timeout
    }

    /// Share of `verdict` in percent, 0.0 for an empty category
    pub fn percentage(&self, verdict: Verdict) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.get(verdict) as f64 * 100.0 / total as f64
        }
    }
}

/// Thread-safe multi-category verdict counter
///
/// Shared across concurrent evaluations behind an `Arc`. Every `record`
/// is applied exactly once under the lock, so concurrent updates never
/// lose increments.
#[derive(Debug, Default)]
pub struct ConfusionMatrix {
    counts: Mutex<BTreeMap<String, VerdictCounts>>,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, category: &str, verdict: Verdict) {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.entry(category.to_string()).or_default().add(verdict);
    }

    pub fn record_all(&self, category: &str, verdicts: &[Verdict]) {
        let mut counts = self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = counts.entry(category.to_string()).or_default();
        for verdict in verdicts {
            entry.add(*verdict);
        }
    }

    /// Snapshot of every category seen so far, ordered by category name
    pub fn summary(&self) -> BTreeMap<String, VerdictCounts> {
        self.counts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Trim and lowercase; placeholder and failure markers collapse to empty
pub fn normalize_output(output: &str) -> String {
    let normalized = output.trim().to_lowercase();
    if is_marker(&normalized) {
        String::new()
    } else {
        normalized
    }
}

fn is_marker(normalized: &str) -> bool {
    const EMPTY_MARKERS: [&str; 6] = ["n/a", "na", "none", "null", "error", "no_code_extracted"];

    EMPTY_MARKERS.contains(&normalized)
        || normalized == markers::TIMEOUT.to_lowercase()
        || normalized == markers::MEMORY_LIMIT_EXCEEDED.to_lowercase()
        || normalized.starts_with(markers::ERROR_PREFIX.trim_end().to_lowercase().as_str())
}

/// Whether an output counts as "no answer"
pub fn is_empty_or_error(output: &str) -> bool {
    normalize_output(output).is_empty()
}

/// Classify aligned expected/generated outputs into TP/FP/FN/TN
pub fn confusion_stats(expected: &[String], generated: &[String]) -> Result<ConfusionStats> {
    ensure!(
        expected.len() == generated.len(),
        "expected and generated outputs must have the same length ({} vs {})",
        expected.len(),
        generated.len()
    );

    let mut stats = ConfusionStats::default();
    for (expected, generated) in expected.iter().zip(generated) {
        let expected = normalize_output(expected);
        let generated = normalize_output(generated);

        match (expected.is_empty(), generated.is_empty()) {
            (true, true) => stats.true_negatives += 1,
            (true, false) => stats.false_positives += 1,
            (false, true) => stats.false_negatives += 1,
            (false, false) if expected == generated => stats.true_positives += 1,
            (false, false) => stats.false_positives += 1,
        }
    }

    Ok(stats)
}

/// Sum stored confusion statistics; records without any are skipped
pub fn aggregate_stats<'a, I>(stats: I) -> ConfusionStats
where
    I: IntoIterator<Item = Option<&'a ConfusionStats>>,
{
    stats
        .into_iter()
        .flatten()
        .fold(ConfusionStats::default(), |acc, s| acc + *s)
}
