// Pre-execution test case filters
use lazy_static::lazy_static;
use regex::Regex;
use tracejudge_common::config::CaseFilters;
use tracejudge_common::types::{SkipReason, SkippedCase, TestCase};
use tracing::debug;

lazy_static! {
    /// Sample sections in the layouts problem statements commonly use, most specific first
    static ref SAMPLE_PAIR_PATTERNS: Vec<Regex> = vec![
        Regex::new(
            r"(?is)(?:sample|example)\s+input[:\s]*\n?(.*?)(?:\n.*?)?(?:sample|example)\s+output[:\s]*\n?(.*?)(?:\n\n|\n(?:note|constraint|explanation)|$)"
        ),
        Regex::new(
            r"(?is)input[:\s]*\n?(.*?)(?:\n.*?)?output[:\s]*\n?(.*?)(?:\n\n|\n(?:note|constraint|explanation)|$)"
        ),
        Regex::new(r"(?is)(?:input|sample)[:\s]*\n?(.*?)(?:\n.*?)?(?:output|sample\s+output)[:\s]*\n?(.*?)(?:\n\n|$)"),
    ]
    .into_iter()
    .filter_map(Result::ok)
    .collect();
}

/// Lowercase and collapse every whitespace run into a single space
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `(input, output)` pairs found in "Sample Input ... Sample Output" style sections
pub fn find_sample_pairs(statement: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for pattern in SAMPLE_PAIR_PATTERNS.iter() {
        for caps in pattern.captures_iter(statement) {
            let input = caps.get(1).map_or("", |m| m.as_str()).trim();
            let output = caps.get(2).map_or("", |m| m.as_str()).trim();
            if !input.is_empty() && !output.is_empty() {
                pairs.push((input.to_string(), output.to_string()));
            }
        }
    }
    pairs
}

/// Detects test inputs a problem statement already shows as examples
pub struct StatementFilter {
    statement: String,
    samples: Vec<(String, String)>,
}

impl StatementFilter {
    pub fn new(statement: &str) -> Self {
        let samples = find_sample_pairs(statement)
            .into_iter()
            .map(|(input, output)| (normalize_text(&input), normalize_text(&output)))
            .collect();

        Self {
            statement: normalize_text(statement),
            samples,
        }
    }

    pub fn contains(&self, case: &TestCase) -> bool {
        let input = normalize_text(&case.input);
        // An empty stdin is a legitimate test, never treated as a duplicate
        if input.is_empty() {
            return false;
        }

        if self.statement.contains(&input) {
            return true;
        }

        if self
            .samples
            .iter()
            .any(|(sample_in, _)| !sample_in.is_empty() && sample_in.contains(&input))
        {
            return true;
        }

        let output = normalize_text(&case.expected_output);
        !output.is_empty()
            && self.statement.contains(&output)
            && self.samples.iter().any(|(sample_in, sample_out)| {
                !sample_in.is_empty()
                    && !sample_out.is_empty()
                    && sample_in.contains(&input)
                    && sample_out.contains(&output)
            })
    }
}

/// Split `cases` into the ones to execute (with their original index) and the skipped ones
pub fn apply_filters<'a>(
    cases: &'a [TestCase],
    filters: &CaseFilters,
    statement: Option<&str>,
) -> (Vec<(usize, &'a TestCase)>, Vec<SkippedCase>) {
    let statement_filter = statement
        .filter(|_| filters.skip_statement_inputs)
        .map(StatementFilter::new);

    let mut kept = Vec::with_capacity(cases.len());
    let mut skipped = Vec::new();

    for (index, case) in cases.iter().enumerate() {
        let reason = match (filters.max_input_len, filters.max_output_len) {
            (Some(limit), _) if case.input.len() > limit => Some(SkipReason::InputTooLong {
                len: case.input.len(),
                limit,
            }),
            (_, Some(limit)) if case.expected_output.len() > limit => {
                Some(SkipReason::OutputTooLong {
                    len: case.expected_output.len(),
                    limit,
                })
            }
            _ => statement_filter
                .as_ref()
                .filter(|f| f.contains(case))
                .map(|_| SkipReason::InStatement),
        };

        match reason {
            Some(reason) => {
                debug!(case = index, reason = ?reason, "Skipping test case");
                skipped.push(SkippedCase { index, reason });
            }
            None => kept.push((index, case)),
        }
    }

    (kept, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATEMENT: &str = "Given two integers, print their sum.\n\n\
        Sample Input\n3 4\n\nSample Output\n7\n\n\
        Note\nNumbers fit in 32 bits.";

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  A\tb\r\n\n C  "), "a b c");
        assert_eq!(normalize_text(" \n "), "");
    }

    #[test]
    fn test_find_sample_pairs() {
        let pairs = find_sample_pairs(STATEMENT);
        assert!(pairs.iter().any(|(i, o)| i == "3 4" && o == "7"));
    }

    #[test]
    fn test_statement_filter() {
        let filter = StatementFilter::new(STATEMENT);

        assert!(filter.contains(&TestCase::new("3   4\n", "7")));
        assert!(!filter.contains(&TestCase::new("10 20\n", "30")));
        assert!(!filter.contains(&TestCase::new("", "0")));
    }

    #[test]
    fn test_apply_filters_keeps_indices() {
        let cases = vec![
            TestCase::new("3 4", "7"),
            TestCase::new("1 1", "2"),
            TestCase::new("x".repeat(50), "1"),
            TestCase::new("5 5", "y".repeat(50)),
        ];
        let filters = CaseFilters {
            max_input_len: Some(20),
            max_output_len: Some(20),
            skip_statement_inputs: true,
        };

        let (kept, skipped) = apply_filters(&cases, &filters, Some(STATEMENT));

        assert_eq!(kept.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1]);
        assert_eq!(skipped.len(), 3);
        assert_eq!(skipped[0].reason, SkipReason::InStatement);
        assert_eq!(
            skipped[1].reason,
            SkipReason::InputTooLong { len: 50, limit: 20 }
        );
        assert!(matches!(skipped[2].reason, SkipReason::OutputTooLong { .. }));
    }

    #[test]
    fn test_statement_filter_disabled() {
        let cases = vec![TestCase::new("3 4", "7")];
        let filters = CaseFilters {
            skip_statement_inputs: false,
            ..Default::default()
        };

        let (kept, skipped) = apply_filters(&cases, &filters, Some(STATEMENT));
        assert_eq!(kept.len(), 1);
        assert!(skipped.is_empty());
    }
}
