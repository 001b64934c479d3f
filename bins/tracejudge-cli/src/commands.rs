// CLI commands for running candidates and maintaining response files
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracejudge_common::config::SandboxConfig;
use tracejudge_common::records;
use tracejudge_common::stats::ConfusionStats;
use tracejudge_common::types::{ExecutionStatus, Persona, ResponseRecord};
use tracejudge_sandbox::aggregator::{aggregate_stats, confusion_stats};
use tracejudge_sandbox::evaluator::evaluate_case;
use tracejudge_sandbox::extractor::extract_code;
use tracejudge_sandbox::LocalEngine;
use tracing::warn;

fn load_config(path: &Path) -> Result<SandboxConfig> {
    let mut config = SandboxConfig::load_or_default(path)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("File {} does not exist", path.display());
    }
    Ok(())
}

/// Run one source file in the sandbox and report what happened
pub async fn run(
    config_path: &Path,
    source: &Path,
    input: Option<&Path>,
    expected: Option<&Path>,
    time_limit: Option<f64>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let source_code = fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let stdin = match input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => String::new(),
    };

    let mut limits = config.limits();
    if let Some(secs) = time_limit {
        if !(secs.is_finite() && secs > 0.0) {
            bail!("--time-limit must be a positive number of seconds");
        }
        limits.time_limit = Duration::from_secs_f64(secs);
    }

    let engine = LocalEngine::new(&config);
    if limits.memory_limit_bytes.is_some() && !engine.capabilities().memory_limit_active {
        println!("⚠️  Memory limit is not enforced on this platform");
    }

    println!("🚀 Running {}...", source.display());
    let result = engine.run(&source_code, &stdin, &limits).await?;

    let status = match result.status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::TimedOut => "timed out",
        ExecutionStatus::RuntimeError => "runtime error",
        ExecutionStatus::MemoryExceeded => "memory limit exceeded",
    };
    println!("Status:  {}", status);
    println!("Elapsed: {}ms", result.elapsed_ms);
    if let Some(kb) = result.peak_memory_kb {
        println!("Memory:  {} KiB", kb);
    }
    if let Some(error) = &result.error {
        println!("Error:   {}", error);
    }
    println!("{}", "─".repeat(40));
    print!("{}", result.output);
    if !result.output.is_empty() && !result.output.ends_with('\n') {
        println!();
    }
    println!("{}", "─".repeat(40));
    if result.output_truncated {
        println!("⚠️  Output truncated at {} bytes", config.max_output_bytes);
    }

    if let Some(path) = expected {
        let expected_output = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let verdict = evaluate_case(&result, &expected_output, &config.tolerance);
        println!("Verdict: {}", verdict);
    }

    Ok(())
}

/// Print the program extracted from a raw response
pub fn extract(config_path: &Path, response: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let text = fs::read_to_string(response)
        .with_context(|| format!("Failed to read {}", response.display()))?;

    match extract_code(&text, &config.extraction) {
        Some(code) => println!("{}", code),
        None => bail!("No {} code block found", config.extraction.languages.join("/")),
    }
    Ok(())
}

/// Fill `confusion_matrix` on records lacking it, rewriting the file only if something changed
pub fn add_stats(file: &Path) -> Result<()> {
    ensure_exists(file)?;
    println!("📝 Processing {}...", file.display());

    let mut responses = records::read_records(file)?;
    println!("Found {} responses", responses.len());

    let updated = add_missing_stats(&mut responses);
    if updated > 0 {
        records::write_records(file, &responses)?;
        println!("✅ Updated {} responses with confusion matrix statistics", updated);
    } else {
        println!("No responses needed updating");
    }
    Ok(())
}

fn add_missing_stats(responses: &mut [ResponseRecord]) -> usize {
    let mut updated = 0;
    for response in responses.iter_mut() {
        if response.confusion_matrix.is_some()
            || response.expected_outputs.is_empty()
            || response.generated_outputs.is_empty()
        {
            continue;
        }

        match confusion_stats(&response.expected_outputs, &response.generated_outputs) {
            Ok(stats) => {
                response.confusion_matrix = Some(stats);
                updated += 1;
            }
            Err(e) => {
                warn!(response_id = %response.id, error = %e, "Skipping response");
            }
        }
    }
    updated
}

#[derive(Debug, Serialize)]
struct PerformanceSummary {
    naive: Option<ConfusionStats>,
    reasoning: Option<ConfusionStats>,
    overall: ConfusionStats,
    counts: SummaryCounts,
}

#[derive(Debug, Serialize)]
struct SummaryCounts {
    total: usize,
    naive: usize,
    reasoning: usize,
}

fn performance_summary(responses: &[ResponseRecord]) -> PerformanceSummary {
    let by_persona = |persona: Persona| -> Vec<&ResponseRecord> {
        responses.iter().filter(|r| r.persona == persona).collect()
    };
    let naive = by_persona(Persona::Naive);
    let reasoning = by_persona(Persona::Reasoning);

    let stats = |group: &[&ResponseRecord]| {
        (!group.is_empty())
            .then(|| aggregate_stats(group.iter().map(|r| r.confusion_matrix.as_ref())))
    };

    PerformanceSummary {
        naive: stats(&naive),
        reasoning: stats(&reasoning),
        overall: aggregate_stats(responses.iter().map(|r| r.confusion_matrix.as_ref())),
        counts: SummaryCounts {
            total: responses.len(),
            naive: naive.len(),
            reasoning: reasoning.len(),
        },
    }
}

fn print_stats(title: &str, stats: &ConfusionStats) {
    println!("=== {} ===", title);
    println!("Accuracy: {:.3}", stats.accuracy());
    println!("Precision: {:.3}", stats.precision());
    println!("Recall: {:.3}", stats.recall());
    println!("F1 Score: {:.3}", stats.f1_score());
    println!("Specificity: {:.3}", stats.specificity());
    println!("Total Samples: {}", stats.total_samples());
    println!("True Positives: {}", stats.true_positives);
    println!("False Positives: {}", stats.false_positives);
    println!("False Negatives: {}", stats.false_negatives);
    println!("True Negatives: {}", stats.true_negatives);
    println!();
}

/// Aggregate stored confusion statistics by persona
pub fn summarize(file: &Path, json: bool) -> Result<()> {
    ensure_exists(file)?;
    let responses = records::read_records(file)?;
    let summary = performance_summary(&responses);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📊 Analyzing {}...", file.display());
    println!("Found {} responses", summary.counts.total);
    println!("  - Naive: {}", summary.counts.naive);
    println!("  - Reasoning: {}", summary.counts.reasoning);
    println!();

    if let Some(stats) = &summary.naive {
        print_stats("NAIVE CODER PERFORMANCE", stats);
    }
    if let Some(stats) = &summary.reasoning {
        print_stats("REASONING PERFORMANCE", stats);
    }
    if summary.counts.total > 0 {
        print_stats("OVERALL PERFORMANCE", &summary.overall);
    }
    Ok(())
}

pub fn convert(input: &Path, output: &Path) -> Result<()> {
    ensure_exists(input)?;
    let count = records::convert_jsonl_to_json(input, output)?;
    println!(
        "✅ Converted {} responses from {} to {}",
        count,
        input.display(),
        output.display()
    );
    Ok(())
}

pub fn prune_blank(input: &Path, output: &Path) -> Result<()> {
    ensure_exists(input)?;
    let (kept, removed) = records::prune_blank(input, output)?;
    println!(
        "✅ Removed {} blank responses, kept {} ({})",
        removed,
        kept,
        output.display()
    );
    Ok(())
}
