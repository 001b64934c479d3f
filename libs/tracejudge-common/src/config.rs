// Sandbox configuration shared by the worker and the CLI
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/sandbox.json";

/// Numeric tolerance used when comparing output tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub abs: f64,
    pub rel: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { abs: 1e-4, rel: 1e-9 }
    }
}

/// Pre-execution filters applied to a candidate's test cases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseFilters {
    /// Inputs longer than this many bytes are skipped
    pub max_input_len: Option<usize>,
    /// Cases whose expected output is longer than this many bytes are skipped
    pub max_output_len: Option<usize>,
    pub skip_statement_inputs: bool,
}

impl Default for CaseFilters {
    fn default() -> Self {
        Self {
            max_input_len: None,
            max_output_len: None,
            skip_statement_inputs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockPreference {
    #[default]
    First,
    Last,
    Largest,
}

/// How the extractor picks one fenced block out of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPolicy {
    /// Fence tags treated as the target language (compared case-insensitively)
    pub languages: Vec<String>,
    pub preference: BlockPreference,
    /// Consider untagged fences when no tagged block exists
    pub allow_untagged: bool,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            languages: vec!["python".into(), "py".into(), "python3".into()],
            preference: BlockPreference::First,
            allow_untagged: true,
        }
    }
}

impl ExtractionPolicy {
    pub fn matches_language(&self, tag: &str) -> bool {
        self.languages.iter().any(|lang| lang.eq_ignore_ascii_case(tag))
    }
}

/// Limits applied to a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub time_limit: Duration,
    pub memory_limit_bytes: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            memory_limit_bytes: Some(256 * 1024 * 1024),
        }
    }
}

/// Settings the test-case runner needs for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub limits: ExecutionLimits,
    pub tolerance: Tolerance,
    pub filters: CaseFilters,
    pub parallel_cases: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            limits: ExecutionLimits::default(),
            tolerance: Tolerance::default(),
            filters: CaseFilters::default(),
            parallel_cases: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command line; the source file path is appended
    pub interpreter: Vec<String>,
    pub time_limit_secs: f64,
    /// `None` disables the memory ceiling
    pub memory_limit_mb: Option<u64>,
    /// Maximum number of live child processes
    pub pool_size: usize,
    pub max_output_bytes: usize,
    pub parallel_cases: bool,
    pub tolerance: Tolerance,
    pub filters: CaseFilters,
    pub extraction: ExtractionPolicy,
    /// Lines placed ahead of every candidate, so `math`, `random`, `sys` and
    /// `np` are in scope without an import
    pub prelude: Vec<String>,
}

/// Modules candidates may use without importing them
pub fn default_prelude() -> Vec<String> {
    [
        "import math",
        "import random",
        "import sys",
        "try:",
        "    import numpy as np",
        "except Exception:",
        "    pass",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".into()],
            time_limit_secs: 30.0,
            memory_limit_mb: Some(256),
            pool_size: 5,
            max_output_bytes: 1024 * 1024,
            parallel_cases: true,
            tolerance: Tolerance::default(),
            filters: CaseFilters::default(),
            extraction: ExtractionPolicy::default(),
            prelude: default_prelude(),
        }
    }
}

impl SandboxConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No sandbox config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `SANDBOX_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SANDBOX_TIME_LIMIT_SECS") {
            self.time_limit_secs = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid SANDBOX_TIME_LIMIT_SECS: {}", value))?;
        }

        if let Some(value) = lookup("SANDBOX_MEMORY_LIMIT_MB") {
            let value = value.trim();
            self.memory_limit_mb = if value.is_empty() || value == "0" || value.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid SANDBOX_MEMORY_LIMIT_MB: {}", value))?,
                )
            };
        }

        if let Some(value) = lookup("SANDBOX_POOL_SIZE") {
            self.pool_size = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid SANDBOX_POOL_SIZE: {}", value))?;
        }

        if let Some(value) = lookup("SANDBOX_INTERPRETER") {
            self.interpreter = value.split_whitespace().map(String::from).collect();
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.interpreter.is_empty(), "interpreter must not be empty");
        ensure!(
            self.time_limit_secs.is_finite() && self.time_limit_secs > 0.0,
            "time_limit_secs must be positive, got {}",
            self.time_limit_secs
        );
        ensure!(self.pool_size > 0, "pool_size must be at least 1");
        ensure!(self.max_output_bytes > 0, "max_output_bytes must be at least 1");
        ensure!(
            self.tolerance.abs >= 0.0 && self.tolerance.rel >= 0.0,
            "tolerances must be non-negative"
        );
        if let Some(mb) = self.memory_limit_mb {
            ensure!(mb > 0, "memory_limit_mb must be positive when set");
        }
        Ok(())
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_limit: Duration::from_secs_f64(self.time_limit_secs),
            memory_limit_bytes: self.memory_limit_mb.map(|mb| mb * 1024 * 1024),
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            limits: self.limits(),
            tolerance: self.tolerance,
            filters: self.filters.clone(),
            parallel_cases: self.parallel_cases,
        }
    }
}
