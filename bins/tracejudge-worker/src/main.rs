mod config;
mod executor;

use anyhow::Context;
use config::{LogFormat, WorkerSettings};
use executor::RecordExecutor;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracejudge_common::records::{self, RecordWriter};
use tracejudge_common::types::Verdict;
use tracejudge_sandbox::{ConfusionMatrix, LocalEngine, TestCaseRunner};
use tracing::{error, info, warn};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = WorkerSettings::from_env()?;
    init_tracing(settings.log_format);

    info!("tracejudge worker booting...");

    let sandbox_config = config::load_sandbox_config(&settings.config_path).map_err(|e| {
        error!("Failed to load sandbox configuration: {:#}", e);
        e
    })?;

    let engine = Arc::new(LocalEngine::new(&sandbox_config));
    let capabilities = engine.capabilities();
    info!(
        interpreter = %sandbox_config.interpreter.join(" "),
        pool_size = engine.pool_size(),
        time_limit_secs = sandbox_config.time_limit_secs,
        memory_limit_mb = ?sandbox_config.memory_limit_mb,
        memory_limit_active = capabilities.memory_limit_active,
        process_group_kill = capabilities.process_group_kill,
        "Sandbox configured"
    );

    let problems = match &settings.problems_path {
        Some(path) => {
            let problems = records::load_problems(path)?;
            info!(count = problems.len(), path = %path.display(), "Loaded problems");
            records::index_problems(problems)
        }
        None => HashMap::new(),
    };

    let responses = records::read_records(&settings.responses_path)
        .context("Failed to load responses")?;
    let total = responses.len();
    info!(count = total, path = %settings.responses_path.display(), "Loaded responses");

    let matrix = Arc::new(ConfusionMatrix::new());
    let record_executor = Arc::new(RecordExecutor::new(
        TestCaseRunner::new(engine.clone()),
        sandbox_config.clone(),
        problems,
        Arc::clone(&matrix),
    ));

    // Setup graceful shutdown: stop feeding new records, let in-flight ones finish
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Received shutdown signal, finishing in-flight records...");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut writer = RecordWriter::create(&settings.output_path)?;
    let concurrency = settings.concurrency.unwrap_or(sandbox_config.pool_size);

    let mut evaluated = stream::iter(responses)
        .take_while(|_| std::future::ready(!shutdown.load(Ordering::SeqCst)))
        .map(|record| {
            let record_executor = Arc::clone(&record_executor);
            async move { record_executor.evaluate_record(record).await }
        })
        .buffered(concurrency);

    while let Some(record) = evaluated.next().await {
        if let Err(e) = writer.append(&record) {
            // Non-fatal - keep evaluating, the record is lost from the output file
            error!(record_id = %record.id, error = %e, "Failed to write evaluated record");
        }
    }

    let written = writer.written();
    if written < total {
        warn!(written, total, "Stopped before every response was evaluated");
    }

    let summary = executor::summarize(&matrix);
    for (category, stats) in &summary {
        info!(
            category = %category,
            total = stats.total,
            pass = stats.counts.get(Verdict::Pass),
            fail = stats.counts.get(Verdict::Fail),
            error = stats.counts.get(Verdict::Error),
            timeout = stats.counts.get(Verdict::Timeout),
            pass_rate = stats.pass_rate,
            "Category summary"
        );
    }

    if let Some(path) = &settings.summary_path {
        let rendered = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!(path = %path.display(), "Summary written");
    }

    info!(written, output = %settings.output_path.display(), "Worker shutdown complete");
    Ok(())
}
