/// Record Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one stored response into an evaluated record.
///
/// **Architecture:**
/// 1. Extract the candidate program (extractor)
/// 2. Run it against the record's inputs (runner → engine → evaluator)
/// 3. Record verdicts under the persona and difficulty categories (aggregator)
/// 4. Fill `generated_outputs`, `verdicts`, `confusion_matrix`, `evaluated_at`
///
/// This module is the glue layer. Reasoning responses are judged on their
/// predicted outputs and never executed.
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracejudge_common::config::SandboxConfig;
use tracejudge_common::types::{markers, Evaluation, Persona, Problem, ResponseRecord, Verdict};
use tracejudge_sandbox::aggregator::{confusion_stats, ConfusionMatrix, VerdictCounts};
use tracejudge_sandbox::evaluator::judge_prediction;
use tracejudge_sandbox::extractor::extract_candidate;
use tracejudge_sandbox::TestCaseRunner;
use tracing::{debug, info, warn};

/// Generated-output placeholder for cases that were filtered out or never ran
const NOT_EVALUATED: &str = "N/A";

pub struct RecordExecutor {
    runner: TestCaseRunner,
    config: SandboxConfig,
    problems: HashMap<u64, Problem>,
    matrix: Arc<ConfusionMatrix>,
}

impl RecordExecutor {
    pub fn new(
        runner: TestCaseRunner,
        config: SandboxConfig,
        problems: HashMap<u64, Problem>,
        matrix: Arc<ConfusionMatrix>,
    ) -> Self {
        Self {
            runner,
            config,
            problems,
            matrix,
        }
    }

    #[tracing::instrument(skip(self, record), fields(record_id = %record.id, problem_id = record.problem_id, persona = %record.persona))]
    pub async fn evaluate_record(&self, mut record: ResponseRecord) -> ResponseRecord {
        let problem = self.problems.get(&record.problem_id);

        let verdicts = match record.persona {
            Persona::Naive => self.execute_naive(&mut record, problem).await,
            Persona::Reasoning => self.judge_reasoning(&mut record),
        };

        let evaluated: Vec<Verdict> = verdicts.iter().flatten().copied().collect();
        self.matrix.record_all(&record.persona.to_string(), &evaluated);
        if let Some(difficulty) = problem.map(|p| p.difficulty.trim()).filter(|d| !d.is_empty()) {
            self.matrix
                .record_all(&format!("difficulty:{}", difficulty), &evaluated);
        }

        let expected: Vec<String> = record
            .test_cases()
            .into_iter()
            .map(|c| c.expected_output)
            .collect();
        let generated = padded(&record.generated_outputs, expected.len());
        match confusion_stats(&expected, &generated) {
            Ok(stats) => record.confusion_matrix = Some(stats),
            Err(e) => warn!(error = %e, "Could not compute confusion statistics"),
        }

        info!(
            evaluated = evaluated.len(),
            passed = evaluated.iter().filter(|v| **v == Verdict::Pass).count(),
            "Record evaluated"
        );

        record.verdicts = Some(verdicts);
        record.evaluated_at = Some(Utc::now());
        record
    }

    async fn execute_naive(
        &self,
        record: &mut ResponseRecord,
        problem: Option<&Problem>,
    ) -> Vec<Option<Verdict>> {
        let cases = record.test_cases();

        let Some(candidate) = extract_candidate(&record.trace, &self.config.extraction) else {
            debug!("No code block found in response");
            record.generated_outputs = vec![markers::NO_CODE_EXTRACTED.to_string(); cases.len()];
            return vec![Some(Verdict::Error); cases.len()];
        };

        let statement = problem.map(|p| p.question.as_str()).filter(|q| !q.is_empty());
        let evaluation = self
            .runner
            .evaluate(&candidate, &cases, &self.config.runner_config(), statement)
            .await;

        let (generated, verdicts) = align(&evaluation, cases.len());
        record.generated_outputs = generated;
        verdicts
    }

    fn judge_reasoning(&self, record: &mut ResponseRecord) -> Vec<Option<Verdict>> {
        let predicted = padded(&record.generated_outputs, record.inputs.len());
        record
            .test_cases()
            .iter()
            .zip(&predicted)
            .map(|(case, prediction)| {
                Some(judge_prediction(
                    &case.expected_output,
                    prediction,
                    &self.config.tolerance,
                ))
            })
            .collect()
    }
}

/// Spread an evaluation back over the record's `len` inputs
fn align(evaluation: &Evaluation, len: usize) -> (Vec<String>, Vec<Option<Verdict>>) {
    let mut generated = vec![NOT_EVALUATED.to_string(); len];
    let mut verdicts = vec![None; len];
    for report in &evaluation.cases {
        if report.index < len {
            generated[report.index] = report.generated_output();
            verdicts[report.index] = Some(report.verdict);
        }
    }
    (generated, verdicts)
}

fn padded(values: &[String], len: usize) -> Vec<String> {
    (0..len)
        .map(|i| values.get(i).cloned().unwrap_or_default())
        .collect()
}

#[derive(Debug, Serialize)]
pub struct CategorySummary {
    #[serde(flatten)]
    pub counts: VerdictCounts,
    pub total: u64,
    pub pass_rate: f64,
    pub fail_rate: f64,
    pub error_rate: f64,
    pub timeout_rate: f64,
}

impl From<VerdictCounts> for CategorySummary {
    fn from(counts: VerdictCounts) -> Self {
        Self {
            total: counts.total(),
            pass_rate: counts.percentage(Verdict::Pass),
            fail_rate: counts.percentage(Verdict::Fail),
            error_rate: counts.percentage(Verdict::Error),
            timeout_rate: counts.percentage(Verdict::Timeout),
            counts,
        }
    }
}

/// Per-category summary as written to `SUMMARY_PATH`
pub fn summarize(matrix: &ConfusionMatrix) -> BTreeMap<String, CategorySummary> {
    matrix
        .summary()
        .into_iter()
        .map(|(category, counts)| (category, CategorySummary::from(counts)))
        .collect()
}
