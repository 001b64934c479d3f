use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::stats::ConfusionStats;

/// Markers written into `generated_outputs` when a case produced no usable output.
pub mod markers {
    pub const NO_CODE_EXTRACTED: &str = "NO_CODE_EXTRACTED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const MEMORY_LIMIT_EXCEEDED: &str = "MEMORY_LIMIT_EXCEEDED";
    pub const ERROR_PREFIX: &str = "ERROR: ";
}

/// Prompting strategy that produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// Produces executable code; the sandbox runs it
    Naive,
    /// Produces a reasoning trace with predicted outputs; never executed
    Reasoning,
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persona::Naive => write!(f, "naive"),
            Persona::Reasoning => write!(f, "reasoning"),
        }
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "naive" => Ok(Persona::Naive),
            "reasoning" => Ok(Persona::Reasoning),
            other => Err(format!("unknown persona: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Source text extracted from a raw response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    source: String,
}

impl Candidate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Terminal status of one sandboxed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
    RuntimeError,
    MemoryExceeded,
}

/// Outcome of running one candidate against one test input
///
/// `output` is always empty for `TimedOut`: partial output captured before
/// the kill is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub elapsed_ms: u64,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    /// Peak resident set size of the child, `None` when the platform cannot report it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_kb: Option<u64>,
    /// stdout went past the output cap and `output` holds only its head
    #[serde(default)]
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn completed(output: String, elapsed_ms: u64) -> Self {
        Self {
            output,
            elapsed_ms,
            status: ExecutionStatus::Completed,
            error: None,
            peak_memory_kb: None,
            output_truncated: false,
        }
    }

    pub fn timed_out(elapsed_ms: u64) -> Self {
        Self {
            output: String::new(),
            elapsed_ms,
            status: ExecutionStatus::TimedOut,
            error: None,
            peak_memory_kb: None,
            output_truncated: false,
        }
    }

    pub fn runtime_error(output: String, error: String, elapsed_ms: u64) -> Self {
        Self {
            output,
            elapsed_ms,
            status: ExecutionStatus::RuntimeError,
            error: Some(error),
            peak_memory_kb: None,
            output_truncated: false,
        }
    }

    pub fn memory_exceeded(error: Option<String>, elapsed_ms: u64) -> Self {
        Self {
            output: String::new(),
            elapsed_ms,
            status: ExecutionStatus::MemoryExceeded,
            error,
            peak_memory_kb: None,
            output_truncated: false,
        }
    }

    pub fn with_peak_memory(mut self, peak_memory_kb: Option<u64>) -> Self {
        self.peak_memory_kb = peak_memory_kb;
        self
    }

    pub fn with_truncated_output(mut self, truncated: bool) -> Self {
        self.output_truncated = truncated;
        self
    }
}

/// Per-case classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
    /// Wall-clock or memory ceiling exceeded
    Timeout,
}

impl Verdict {
    pub const ALL: [Verdict; 4] = [Verdict::Pass, Verdict::Fail, Verdict::Error, Verdict::Timeout];
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Error => write!(f, "error"),
            Verdict::Timeout => write!(f, "timeout"),
        }
    }
}

/// Terminal state of one candidate after all cases ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOutcome {
    AllPass,
    PartialFail,
    AllError,
}

/// Verdict plus the raw execution for one evaluated case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    /// Position of the case in the caller's original test case list
    pub index: usize,
    pub verdict: Verdict,
    /// `None` when the sandbox itself failed before the candidate ran
    pub result: Option<ExecutionResult>,
    pub infrastructure_error: Option<String>,
}

impl CaseReport {
    /// Text stored in `generated_outputs` for this case
    pub fn generated_output(&self) -> String {
        if let Some(err) = &self.infrastructure_error {
            return format!("{}{}", markers::ERROR_PREFIX, err);
        }

        match &self.result {
            Some(result) => match result.status {
                ExecutionStatus::Completed => result.output.trim().to_string(),
                ExecutionStatus::TimedOut => markers::TIMEOUT.to_string(),
                ExecutionStatus::MemoryExceeded => markers::MEMORY_LIMIT_EXCEEDED.to_string(),
                ExecutionStatus::RuntimeError => format!(
                    "{}{}",
                    markers::ERROR_PREFIX,
                    result.error.as_deref().unwrap_or("runtime error")
                ),
            },
            None => format!("{}no execution result", markers::ERROR_PREFIX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    InputTooLong { len: usize, limit: usize },
    OutputTooLong { len: usize, limit: usize },
    InStatement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCase {
    pub index: usize,
    pub reason: SkipReason,
}

/// Everything the test-case runner learned about one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub cases: Vec<CaseReport>,
    pub skipped: Vec<SkippedCase>,
    pub outcome: CandidateOutcome,
    /// Set when the process budget went away mid-batch; `cases` holds the prefix that ran
    pub aborted: bool,
}

impl Evaluation {
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.cases.iter().map(|c| c.verdict).collect()
    }

    /// `Pass` iff every case passed, otherwise the first non-pass verdict
    pub fn overall_verdict(&self) -> Verdict {
        self.cases
            .iter()
            .map(|c| c.verdict)
            .find(|v| *v != Verdict::Pass)
            .unwrap_or(Verdict::Pass)
    }
}

/// Problem metadata as exported for the annotation UI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Problem {
    #[serde(deserialize_with = "lenient_string")]
    pub problem_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub question: String,
    #[serde(deserialize_with = "lenient_string")]
    pub difficulty: String,
    pub tags: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub time_limit: String,
    #[serde(deserialize_with = "lenient_string")]
    pub memory_limit: String,
    pub sample_inputs: Vec<String>,
    pub sample_outputs: Vec<String>,
}

/// One evaluated response, one JSON object per line on disk
///
/// Unknown fields (annotations added downstream) survive a read/write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: String,
    #[serde(deserialize_with = "problem_id_from_int_or_str")]
    pub problem_id: u64,
    #[serde(rename = "type")]
    pub persona: Persona,
    #[serde(default)]
    pub trace: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub generated_outputs: Vec<String>,
    /// Aligned with `inputs`; `null` marks a case that was filtered out or never ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdicts: Option<Vec<Option<Verdict>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confusion_matrix: Option<ConfusionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResponseRecord {
    /// Pair inputs with expected outputs; a missing expected output is empty
    pub fn test_cases(&self) -> Vec<TestCase> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let expected = self.expected_outputs.get(i).cloned().unwrap_or_default();
                TestCase::new(input.clone(), expected)
            })
            .collect()
    }

    pub fn has_blank_trace(&self) -> bool {
        self.trace.trim().is_empty()
    }
}

fn problem_id_from_int_or_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Int(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid problem_id: {:?}", text))),
    }
}

/// Strings exported by older tooling may be numbers or `null`
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string, number or null, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(verdict: Verdict, result: ExecutionResult) -> CaseReport {
        CaseReport {
            index: 0,
            verdict,
            result: Some(result),
            infrastructure_error: None,
        }
    }

    #[test]
    fn test_persona_roundtrip() {
        assert_eq!("naive".parse::<Persona>().unwrap(), Persona::Naive);
        assert_eq!("Reasoning".parse::<Persona>().unwrap(), Persona::Reasoning);
        assert!("expert".parse::<Persona>().is_err());
        assert_eq!(Persona::Naive.to_string(), "naive");
    }

    #[test]
    fn test_verdict_serializes_lowercase() {
        let json = serde_json::to_string(&vec![Verdict::Pass, Verdict::Timeout]).unwrap();
        assert_eq!(json, r#"["pass","timeout"]"#);
    }

    #[test]
    fn test_execution_result_usage_fields() {
        let result = ExecutionResult::completed("x".into(), 3)
            .with_peak_memory(Some(9216))
            .with_truncated_output(true);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["peak_memory_kb"], 9216);
        assert_eq!(json["output_truncated"], true);

        // older serialized results lack both fields
        let old: ExecutionResult = serde_json::from_str(
            r#"{"output":"","elapsed_ms":1,"status":"timed_out","error":null}"#,
        )
        .unwrap();
        assert_eq!(old, ExecutionResult::timed_out(1));
        assert!(serde_json::to_value(&old).unwrap().get("peak_memory_kb").is_none());
    }

    #[test]
    fn test_generated_output_markers() {
        let ok = report(Verdict::Pass, ExecutionResult::completed("42\n".into(), 3));
        assert_eq!(ok.generated_output(), "42");

        let slow = report(Verdict::Timeout, ExecutionResult::timed_out(1000));
        assert_eq!(slow.generated_output(), markers::TIMEOUT);

        let oom = report(Verdict::Timeout, ExecutionResult::memory_exceeded(None, 10));
        assert_eq!(oom.generated_output(), markers::MEMORY_LIMIT_EXCEEDED);

        let crash = report(
            Verdict::Error,
            ExecutionResult::runtime_error(String::new(), "ValueError: x".into(), 5),
        );
        assert_eq!(crash.generated_output(), "ERROR: ValueError: x");

        let infra = CaseReport {
            index: 2,
            verdict: Verdict::Error,
            result: None,
            infrastructure_error: Some("spawn failed".into()),
        };
        assert_eq!(infra.generated_output(), "ERROR: spawn failed");
    }

    #[test]
    fn test_overall_verdict_is_first_non_pass() {
        let evaluation = Evaluation {
            cases: vec![
                report(Verdict::Pass, ExecutionResult::completed("1".into(), 1)),
                report(Verdict::Timeout, ExecutionResult::timed_out(1)),
                report(Verdict::Fail, ExecutionResult::completed("2".into(), 1)),
            ],
            skipped: vec![],
            outcome: CandidateOutcome::PartialFail,
            aborted: false,
        };
        assert_eq!(evaluation.overall_verdict(), Verdict::Timeout);
        assert_eq!(
            evaluation.verdicts(),
            vec![Verdict::Pass, Verdict::Timeout, Verdict::Fail]
        );
    }

    #[test]
    fn test_record_accepts_string_problem_id_and_keeps_extra_fields() {
        let line = r#"{"id":"r-1","problem_id":"17","type":"naive","trace":"t",
            "inputs":["1"],"expected_outputs":["2"],"generated_outputs":[],
            "category":"logic","notes":"checked"}"#;
        let record: ResponseRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.problem_id, 17);
        assert_eq!(record.persona, Persona::Naive);
        assert_eq!(record.extra.get("category").unwrap(), "logic");

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["notes"], "checked");
        assert_eq!(out["type"], "naive");
        assert!(out.get("verdicts").is_none());
    }

    #[test]
    fn test_problem_tolerates_numbers_and_nulls() {
        let problem: Problem = serde_json::from_str(
            r#"{"problem_id": 12, "name": "Sum", "difficulty": null, "time_limit": 2.0}"#,
        )
        .unwrap();

        assert_eq!(problem.problem_id, "12");
        assert_eq!(problem.difficulty, "");
        assert_eq!(problem.time_limit, "2.0");
        assert!(problem.sample_inputs.is_empty());
    }

    #[test]
    fn test_record_test_cases_pad_missing_expected() {
        let record: ResponseRecord = serde_json::from_str(
            r#"{"id":"r-2","problem_id":3,"type":"reasoning","trace":"",
                "inputs":["a","b"],"expected_outputs":["x"]}"#,
        )
        .unwrap();

        let cases = record.test_cases();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1], TestCase::new("b", ""));
        assert!(record.has_blank_trace());
    }
}
