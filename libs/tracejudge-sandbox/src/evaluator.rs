//! Output Evaluator - Execution-Agnostic Judging
//!
//! **Core Responsibility:**
//! Compare raw program output against expected output and assign verdicts.
//!
//! **Critical Properties:**
//! - Knows nothing about processes or interpreters
//! - Pure functions: (execution result, expected output) → verdict
//!
//! **Normalization Rules:**
//! - Whitespace-insensitive: both sides are split into whitespace-separated tokens
//! - Numeric tokens match within an absolute or relative tolerance
//! - Two integer literals must be equal exactly, at any magnitude
//! - Everything else is an exact, case-sensitive text match
//! - Different token counts never match

use tracejudge_common::config::Tolerance;
use tracejudge_common::types::{
    CandidateOutcome, CaseReport, ExecutionResult, ExecutionStatus, Verdict,
};

/// Numeric reading of an output token
enum Number {
    Int(i128),
    Float(f64),
}

/// Parse a token as a number. Tokens without any digit (`inf`, `nan`) stay text.
fn parse_number(token: &str) -> Option<Number> {
    if !token.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Ok(value) = token.parse::<i128>() {
        return Some(Number::Int(value));
    }
    token.parse::<f64>().ok().map(Number::Float)
}

fn as_f64(number: &Number) -> f64 {
    match number {
        Number::Int(v) => *v as f64,
        Number::Float(v) => *v,
    }
}

fn tokens_match(expected: &str, produced: &str, tolerance: &Tolerance) -> bool {
    if expected == produced {
        return true;
    }

    match (parse_number(expected), parse_number(produced)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
        (Some(a), Some(b)) => {
            let (a, b) = (as_f64(&a), as_f64(&b));
            // Overflowed tokens (`1e400`) only match verbatim, handled above
            if !a.is_finite() || !b.is_finite() {
                return false;
            }
            let diff = (a - b).abs();
            let scale = a.abs().max(b.abs());
            // One ulp of slack so a difference written exactly at the tolerance still matches
            let slack = f64::EPSILON * scale.max(1.0);
            diff <= tolerance.abs + slack || diff <= tolerance.rel * scale + slack
        }
        // One side numeric, the other not
        (Some(_), None) | (None, Some(_)) => false,
        (None, None) => false,
    }
}

/// Token-wise comparison of expected vs produced output
pub fn compare(expected: &str, produced: &str, tolerance: &Tolerance) -> bool {
    let expected: Vec<&str> = expected.split_whitespace().collect();
    let produced: Vec<&str> = produced.split_whitespace().collect();

    expected.len() == produced.len()
        && expected
            .iter()
            .zip(&produced)
            .all(|(e, p)| tokens_match(e, p, tolerance))
}

/// Map one execution result to a verdict
///
/// Resource-limit terminations (wall clock or memory) share the `Timeout`
/// verdict; the `ExecutionResult` kept on the case report tells them apart.
pub fn evaluate_case(result: &ExecutionResult, expected: &str, tolerance: &Tolerance) -> Verdict {
    match result.status {
        ExecutionStatus::TimedOut | ExecutionStatus::MemoryExceeded => Verdict::Timeout,
        ExecutionStatus::RuntimeError => Verdict::Error,
        ExecutionStatus::Completed => {
            if compare(expected, &result.output, tolerance) {
                Verdict::Pass
            } else {
                Verdict::Fail
            }
        }
    }
}

/// Terminal state of a candidate from its case reports
///
/// Zero evaluated cases is vacuously `AllPass`.
pub fn candidate_outcome(cases: &[CaseReport]) -> CandidateOutcome {
    if cases.iter().all(|c| c.verdict == Verdict::Pass) {
        CandidateOutcome::AllPass
    } else if cases
        .iter()
        .all(|c| matches!(c.verdict, Verdict::Error | Verdict::Timeout))
    {
        CandidateOutcome::AllError
    } else {
        CandidateOutcome::PartialFail
    }
}

/// Verdict for an output predicted without running anything
///
/// Blank predictions and error markers are `Error`; anything else is compared.
pub fn judge_prediction(expected: &str, predicted: &str, tolerance: &Tolerance) -> Verdict {
    let trimmed = predicted.trim();
    if trimmed.is_empty() || crate::aggregator::is_empty_or_error(trimmed) {
        return Verdict::Error;
    }

    if compare(expected, trimmed, tolerance) {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tol() -> Tolerance {
        Tolerance::default()
    }

    fn report(verdict: Verdict) -> CaseReport {
        CaseReport {
            index: 0,
            verdict,
            result: None,
            infrastructure_error: None,
        }
    }

    #[test]
    fn test_whitespace_insensitive() {
        assert!(compare("1 2 3\n", "1  2\n3", &tol()));
        assert!(compare("hello\r\nworld", " hello world ", &tol()));
        assert!(compare("", "\n\n", &tol()));
    }

    #[test]
    fn test_case_sensitive_text() {
        assert!(!compare("YES", "yes", &tol()));
        assert!(compare("YES", "YES", &tol()));
    }

    #[test]
    fn test_token_count_mismatch() {
        assert!(!compare("1 2", "1 2 3", &tol()));
        assert!(!compare("1", "", &tol()));
    }

    #[test]
    fn test_float_tolerance() {
        assert!(compare("0.333333", "0.33333333", &tol()));
        assert!(compare("2", "2.00000", &tol()));
        assert!(compare("1e9", "1000000000.0000001", &tol()));
        assert!(!compare("0.5", "0.6", &tol()));

        let strict = Tolerance { abs: 0.0, rel: 0.0 };
        assert!(!compare("0.333333", "0.33333333", &strict));
    }

    #[test]
    fn test_difference_at_absolute_tolerance() {
        assert!(compare("1.0000", "1.0001", &tol()));
        assert!(compare("1.0001", "1.0000", &tol()));
        assert!(!compare("1.0000", "1.0002", &tol()));
        assert!(!compare("1.0000", "2", &tol()));
    }

    #[test]
    fn test_overflowing_tokens_match_only_verbatim() {
        assert!(!compare("1e400", "1e401", &tol()));
        assert!(!compare("1e400", "-1e400", &tol()));
        assert!(!compare("1e400", "5", &tol()));
        assert!(compare("1e400", "1e400", &tol()));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        assert!(!compare("9007199254740993", "9007199254740992", &tol()));
        assert!(compare("-12345678901234567890", "-12345678901234567890", &tol()));
    }

    #[test]
    fn test_numeric_vs_text() {
        assert!(!compare("1", "one", &tol()));
        assert!(!compare("inf", "1", &tol()));
        assert!(compare("nan", "nan", &tol()));
    }

    #[test]
    fn test_evaluate_case_status_mapping() {
        assert_eq!(
            evaluate_case(&ExecutionResult::completed("7\n".into(), 1), "7", &tol()),
            Verdict::Pass
        );
        assert_eq!(
            evaluate_case(&ExecutionResult::completed("8".into(), 1), "7", &tol()),
            Verdict::Fail
        );
        assert_eq!(
            evaluate_case(&ExecutionResult::timed_out(1000), "7", &tol()),
            Verdict::Timeout
        );
        assert_eq!(
            evaluate_case(&ExecutionResult::memory_exceeded(None, 10), "7", &tol()),
            Verdict::Timeout
        );
        assert_eq!(
            evaluate_case(
                &ExecutionResult::runtime_error("7".into(), "ValueError: x".into(), 1),
                "7",
                &tol()
            ),
            Verdict::Error
        );
    }

    #[test]
    fn test_candidate_outcome() {
        assert_eq!(candidate_outcome(&[]), CandidateOutcome::AllPass);
        assert_eq!(
            candidate_outcome(&[report(Verdict::Pass), report(Verdict::Pass)]),
            CandidateOutcome::AllPass
        );
        assert_eq!(
            candidate_outcome(&[report(Verdict::Error), report(Verdict::Timeout)]),
            CandidateOutcome::AllError
        );
        assert_eq!(
            candidate_outcome(&[report(Verdict::Pass), report(Verdict::Error)]),
            CandidateOutcome::PartialFail
        );
        assert_eq!(
            candidate_outcome(&[report(Verdict::Fail)]),
            CandidateOutcome::PartialFail
        );
    }

    #[test]
    fn test_judge_prediction() {
        assert_eq!(judge_prediction("7", " 7\n", &tol()), Verdict::Pass);
        assert_eq!(judge_prediction("7", "8", &tol()), Verdict::Fail);
        assert_eq!(judge_prediction("7", "", &tol()), Verdict::Error);
        assert_eq!(judge_prediction("7", "N/A", &tol()), Verdict::Error);
        assert_eq!(judge_prediction("7", "ERROR: bad", &tol()), Verdict::Error);
    }
}
