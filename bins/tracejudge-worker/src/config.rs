// Environment-driven settings for the batch evaluation worker
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracejudge_common::config::{SandboxConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub responses_path: PathBuf,
    pub problems_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub summary_path: Option<PathBuf>,
    pub config_path: PathBuf,
    /// Records evaluated concurrently; defaults to the process budget
    pub concurrency: Option<usize>,
    pub log_format: LogFormat,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };
        let optional_path = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

        let concurrency = match lookup("WORKER_CONCURRENCY") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid WORKER_CONCURRENCY: {}", value))?
                    .max(1),
            ),
            None => None,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            responses_path: path("RESPONSES_PATH", "data/responses.jsonl"),
            problems_path: optional_path("PROBLEMS_PATH"),
            output_path: path("OUTPUT_PATH", "data/evaluated_responses.jsonl"),
            summary_path: optional_path("SUMMARY_PATH"),
            config_path: path("SANDBOX_CONFIG", DEFAULT_CONFIG_PATH),
            concurrency,
            log_format,
        })
    }
}

/// Sandbox config from file (or defaults), then `SANDBOX_*` overrides
pub fn load_sandbox_config(path: &Path) -> Result<SandboxConfig> {
    let mut config = SandboxConfig::load_or_default(path)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}
