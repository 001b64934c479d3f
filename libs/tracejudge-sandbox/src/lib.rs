//! Sandbox execution core: extract a candidate program, run it against test
//! inputs in isolated child processes, judge the output and aggregate verdicts.

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod extractor;
pub mod filter;
pub mod runner;


pub use aggregator::{confusion_stats, ConfusionMatrix, VerdictCounts};
pub use engine::{EngineCapabilities, LocalEngine, Sandbox};
pub use error::EngineError;
pub use evaluator::{compare, evaluate_case};
pub use extractor::extract_code;
pub use runner::TestCaseRunner;
