//! Test-Case Runner
//!
//! Fans one candidate out over its test cases, sends each through the sandbox
//! and the evaluator, and gathers the verdicts back in input order.

use futures_util::future::join_all;
use std::sync::Arc;
use tracejudge_common::config::RunnerConfig;
use tracejudge_common::types::{Candidate, CaseReport, Evaluation, TestCase, Verdict};
use tracing::{debug, info, warn};

use crate::engine::Sandbox;
use crate::error::EngineError;
use crate::evaluator::{candidate_outcome, evaluate_case};
use crate::filter::apply_filters;

#[derive(Clone)]
pub struct TestCaseRunner {
    sandbox: Arc<dyn Sandbox>,
}

impl TestCaseRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    /// Evaluate `candidate` against every case that survives the filters
    ///
    /// All cases run; a failing case never stops the rest. Infrastructure
    /// failures become `error` verdicts, except a closed process budget,
    /// which stops the evaluation and marks it `aborted`.
    #[tracing::instrument(skip_all, fields(cases = cases.len()))]
    pub async fn evaluate(
        &self,
        candidate: &Candidate,
        cases: &[TestCase],
        config: &RunnerConfig,
        statement: Option<&str>,
    ) -> Evaluation {
        let (kept, skipped) = apply_filters(cases, &config.filters, statement);
        if !skipped.is_empty() {
            debug!(skipped = skipped.len(), "Filtered test cases before execution");
        }

        let mut reports = Vec::with_capacity(kept.len());
        let mut aborted = false;

        if config.parallel_cases {
            let outcomes = join_all(
                kept.iter()
                    .map(|(index, case)| self.run_case(candidate, *index, case, config)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        warn!(error = %e, completed = reports.len(), "Evaluation aborted");
                        aborted = true;
                        break;
                    }
                }
            }
        } else {
            for (index, case) in &kept {
                match self.run_case(candidate, *index, case, config).await {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        warn!(error = %e, completed = reports.len(), "Evaluation aborted");
                        aborted = true;
                        break;
                    }
                }
            }
        }

        let outcome = candidate_outcome(&reports);
        info!(
            evaluated = reports.len(),
            skipped = skipped.len(),
            outcome = ?outcome,
            aborted,
            "Candidate evaluated"
        );

        Evaluation {
            cases: reports,
            skipped,
            outcome,
            aborted,
        }
    }

    /// One case through sandbox and evaluator. `Err` only for fatal engine errors.
    async fn run_case(
        &self,
        candidate: &Candidate,
        index: usize,
        case: &TestCase,
        config: &RunnerConfig,
    ) -> Result<CaseReport, EngineError> {
        match self
            .sandbox
            .run(candidate.source(), &case.input, &config.limits)
            .await
        {
            Ok(result) => {
                let verdict = evaluate_case(&result, &case.expected_output, &config.tolerance);
                debug!(
                    case = index,
                    verdict = %verdict,
                    status = ?result.status,
                    elapsed_ms = result.elapsed_ms,
                    "Test case finished"
                );
                Ok(CaseReport {
                    index,
                    verdict,
                    result: Some(result),
                    infrastructure_error: None,
                })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(case = index, error = %e, "Sandbox failure, recording error verdict");
                Ok(CaseReport {
                    index,
                    verdict: Verdict::Error,
                    result: None,
                    infrastructure_error: Some(e.to_string()),
                })
            }
        }
    }
}
