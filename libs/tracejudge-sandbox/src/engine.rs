//! Execution Engine - Isolated Program Runs
//!
//! **Core Responsibility:**
//! Execute candidate source with one test input and capture raw output.
//!
//! **Critical Architectural Boundary:**
//! - Engine knows HOW to execute (interpreter, process, limits)
//! - Engine does NOT evaluate correctness
//! - Engine returns raw output for the evaluator to judge
//!
//! Every execution gets a fresh OS process in its own process group, working
//! in a throwaway directory. The process budget (a semaphore) bounds how many
//! children are alive at once across everything sharing the engine.
//!
//! The configured prelude is written ahead of the candidate source, so the
//! modules it imports are in scope for programs that forget to import them.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracejudge_common::config::{ExecutionLimits, SandboxConfig};
use tracejudge_common::types::ExecutionResult;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Safety limits to keep pathological payloads away from the interpreter
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Retained stderr; only the tail of a traceback is ever reported
const MAX_STDERR_BYTES: usize = 64 * 1024;

const SOURCE_FILE_NAME: &str = "main.py";

/// Execution backend seam. The runner only talks to this trait.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(
        &self,
        source: &str,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, EngineError>;
}

/// What the current platform can enforce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// Memory ceilings are applied (RLIMIT_AS before exec, Linux only)
    pub memory_limit_active: bool,
    /// Timeouts kill the whole process group, not just the direct child
    pub process_group_kill: bool,
}

impl EngineCapabilities {
    pub fn current() -> Self {
        Self {
            memory_limit_active: cfg!(target_os = "linux"),
            process_group_kill: cfg!(unix),
        }
    }
}

/// Local child-process execution engine
pub struct LocalEngine {
    interpreter: Vec<String>,
    prelude: String,
    max_output_bytes: usize,
    work_root: PathBuf,
    pool_size: usize,
    permits: Arc<Semaphore>,
    live: Arc<AtomicUsize>,
    warned_memory: AtomicBool,
}

impl LocalEngine {
    pub fn new(config: &SandboxConfig) -> Self {
        Self::with_work_root(config, std::env::temp_dir())
    }

    /// Same as `new`, with per-execution directories created under `work_root`
    pub fn with_work_root(config: &SandboxConfig, work_root: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            prelude: config.prelude.join("\n"),
            max_output_bytes: config.max_output_bytes,
            work_root: work_root.into(),
            pool_size: config.pool_size,
            permits: Arc::new(Semaphore::new(config.pool_size)),
            live: Arc::new(AtomicUsize::new(0)),
            warned_memory: AtomicBool::new(false),
        }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::current()
    }

    /// Number of child processes currently alive
    pub fn live_processes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Close the process budget. Waiting and future runs fail with `PoolClosed`;
    /// executions already holding a slot finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Execute `source` with `input` on stdin under `limits`
    ///
    /// **Safety Guarantees:**
    /// - Input validation: rejects oversized source or input before spawning
    /// - Hard timeout: enforced via tokio::time::timeout, kills the process group on expiry
    /// - Guaranteed cleanup: the work directory is removed by a Drop guard and the
    ///   whole process group is killed when the run ends, even when the caller's
    ///   future is cancelled mid-flight
    /// - Error classification: timeout, memory ceiling and runtime error are
    ///   reported in the result; only infrastructure failures are `Err`
    #[tracing::instrument(skip(self, source, input), fields(source_len = source.len(), input_len = input.len()))]
    pub async fn run(
        &self,
        source: &str,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, EngineError> {
        // GUARDRAIL: validate payload sizes
        if source.len() > MAX_SOURCE_CODE_BYTES {
            return Err(EngineError::InputTooLarge {
                what: "source code",
                actual: source.len(),
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }
        if input.len() > MAX_TEST_INPUT_BYTES {
            return Err(EngineError::InputTooLarge {
                what: "test input",
                actual: input.len(),
                limit: MAX_TEST_INPUT_BYTES,
            });
        }

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;

        let program = compose_source(&self.prelude, source);
        let workspace = Workspace::create(&self.work_root, &program).await?;

        let memory_limit = self.effective_memory_limit(limits);
        let mut command = self.command(workspace.path(), memory_limit)?;

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| EngineError::Spawn {
            program: self.interpreter.join(" "),
            source,
        })?;
        let _live = LiveGuard::new(&self.live);
        let pid = child.id();
        // Declared after `child` so it drops first: a cancelled run loses its grandchildren too
        let mut group = ProcessGroupGuard::new(pid);

        debug!(pid = ?pid, workspace = %workspace.path().display(), "Spawned child process");

        if let Some(mut stdin) = child.stdin.take() {
            let payload = input.as_bytes().to_vec();
            tokio::spawn(async move {
                // The child may exit without reading its input; a broken pipe is expected then
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "stdin closed before all input was written");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child.stdout.take().ok_or(EngineError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(EngineError::MissingPipe("stderr"))?;
        let max_output = self.max_output_bytes;

        let execution = async {
            let exit = async {
                // Usage must be read before `wait` reaps the child
                let peak_memory_kb = peak_memory_at_exit(pid).await;
                (child.wait().await, peak_memory_kb)
            };
            tokio::join!(
                exit,
                read_capped(stdout, max_output),
                read_capped(stderr, MAX_STDERR_BYTES),
            )
        };

        // HARD TIMEOUT
        match tokio::time::timeout(limits.time_limit, execution).await {
            Ok(((status, peak_memory_kb), out, err)) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                // Leader is reaped; sweep anything it left running in the group
                group.kill();

                let status = status.map_err(EngineError::Io)?;
                let (out, truncated) = out.map_err(EngineError::Io)?;
                let (err, _) = err.map_err(EngineError::Io)?;
                let stdout = String::from_utf8_lossy(&out).into_owned();
                let stderr = String::from_utf8_lossy(&err).into_owned();

                if truncated {
                    warn!(max_output_bytes = max_output, "Output truncated at the cap");
                }

                let result = classify(status, stdout, &stderr, memory_limit.is_some(), elapsed_ms)
                    .with_peak_memory(peak_memory_kb)
                    .with_truncated_output(truncated);
                debug!(status = ?result.status, elapsed_ms, peak_memory_kb = ?peak_memory_kb, "Child finished");
                Ok(result)
            }
            Err(_) => {
                warn!(
                    pid = ?pid,
                    time_limit_ms = limits.time_limit.as_millis() as u64,
                    "Execution timed out - killing process group"
                );
                group.kill();
                reap(&mut child).await;
                Ok(ExecutionResult::timed_out(start.elapsed().as_millis() as u64))
            }
        }
    }

    fn effective_memory_limit(&self, limits: &ExecutionLimits) -> Option<u64> {
        let requested = limits.memory_limit_bytes?;
        if self.capabilities().memory_limit_active {
            return Some(requested);
        }
        if !self.warned_memory.swap(true, Ordering::SeqCst) {
            warn!(
                memory_limit_bytes = requested,
                "Memory limit configured but not enforceable on this platform"
            );
        }
        None
    }

    fn command(&self, workdir: &Path, memory_limit: Option<u64>) -> Result<Command, EngineError> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or(EngineError::NoInterpreter)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(SOURCE_FILE_NAME)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // one compute thread per child; the process budget counts processes
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("OMP_NUM_THREADS", "1")
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(bytes) = memory_limit {
                // SAFETY: the closure only calls async-signal-safe setrlimit
                unsafe {
                    command.pre_exec(move || apply_memory_limit(bytes));
                }
            }
        }
        #[cfg(not(target_os = "linux"))]
        let _ = memory_limit;

        Ok(command)
    }
}

#[async_trait]
impl Sandbox for LocalEngine {
    async fn run(
        &self,
        source: &str,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<ExecutionResult, EngineError> {
        LocalEngine::run(self, source, input, limits).await
    }
}

#[cfg(target_os = "linux")]
fn apply_memory_limit(bytes: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // SAFETY: plain syscall on a stack value
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Kill a timed-out child (if the group kill missed it) and reap it
async fn reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill after group kill");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap timed-out child");
    }
}

/// SIGKILLs the child's process group, at the latest when dropped
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// Kill the group now; later calls and the drop are no-ops
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // SAFETY: signalling a process group we created; ESRCH is harmless
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Block until `pid` exits and return its peak RSS in KiB, leaving it unreaped
#[cfg(target_os = "linux")]
async fn peak_memory_at_exit(pid: Option<u32>) -> Option<u64> {
    let pid = pid?;
    tokio::task::spawn_blocking(move || exit_usage(pid))
        .await
        .ok()
        .flatten()
}

#[cfg(not(target_os = "linux"))]
async fn peak_memory_at_exit(_pid: Option<u32>) -> Option<u64> {
    None
}

/// `waitid(WEXITED | WNOWAIT)` with the kernel's rusage out-parameter
#[cfg(target_os = "linux")]
fn exit_usage(pid: u32) -> Option<u64> {
    // SAFETY: both are plain C structs for which all-zero is a valid value
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: raw waitid with valid out-pointers; WNOWAIT keeps the child
        // waitable so tokio still reaps it
        let rc = unsafe {
            libc::syscall(
                libc::SYS_waitid,
                libc::P_PID,
                pid as libc::id_t,
                &mut info as *mut libc::siginfo_t,
                libc::WEXITED | libc::WNOWAIT,
                &mut usage as *mut libc::rusage,
            )
        };
        if rc == 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            debug!(pid, error = %err, "Could not read child resource usage");
            return None;
        }
    }
    u64::try_from(usage.ru_maxrss).ok()
}

/// Read a stream to EOF, keeping at most `cap` bytes and discarding the rest.
/// The flag reports whether anything was discarded.
async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        truncated |= n > room;
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((kept, truncated))
}

/// Prelude followed by the candidate. `from __future__` imports must open the
/// file, so the prelude goes after the last of them.
fn compose_source(prelude: &str, source: &str) -> String {
    if prelude.is_empty() {
        return source.to_string();
    }

    let lines: Vec<&str> = source.lines().collect();
    let split = lines
        .iter()
        .rposition(|line| line.starts_with("from __future__ import"))
        .map_or(0, |i| i + 1);

    let mut program = String::with_capacity(prelude.len() + source.len() + 2);
    for line in &lines[..split] {
        program.push_str(line);
        program.push('\n');
    }
    program.push_str(prelude);
    program.push('\n');
    for line in &lines[split..] {
        program.push_str(line);
        program.push('\n');
    }
    program
}

/// Turn a finished child into an `ExecutionResult`
fn classify(
    status: ExitStatus,
    stdout: String,
    stderr: &str,
    memory_limited: bool,
    elapsed_ms: u64,
) -> ExecutionResult {
    if status.success() {
        return ExecutionResult::completed(stdout, elapsed_ms);
    }

    let last_line = last_error_line(stderr);

    if last_line
        .as_deref()
        .is_some_and(|line| line.starts_with("MemoryError"))
    {
        return ExecutionResult::memory_exceeded(last_line, elapsed_ms);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            if signal == libc::SIGKILL && memory_limited {
                return ExecutionResult::memory_exceeded(
                    Some("killed by SIGKILL under memory limit".to_string()),
                    elapsed_ms,
                );
            }
            let error = last_line.unwrap_or_else(|| format!("killed by signal {}", signal));
            return ExecutionResult::runtime_error(stdout, error, elapsed_ms);
        }
    }
    #[cfg(not(unix))]
    let _ = memory_limited;

    let error = last_line.unwrap_or_else(|| match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "terminated abnormally".to_string(),
    });
    ExecutionResult::runtime_error(stdout, error, elapsed_ms)
}

/// Final non-empty stderr line, e.g. `ValueError: x` from a traceback
fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
}

/// Per-execution directory, removed on drop
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    async fn create(root: &Path, source: &str) -> Result<Self, EngineError> {
        let path = root.join(format!("tracejudge-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(EngineError::Workspace)?;

        // Guard exists before the write so a failed write still cleans up
        let workspace = Self { path };
        tokio::fs::write(workspace.path.join(SOURCE_FILE_NAME), source)
            .await
            .map_err(EngineError::Workspace)?;
        Ok(workspace)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
        }
    }
}

/// Counts a live child for exactly as long as the guard exists
struct LiveGuard<'a> {
    live: &'a AtomicUsize,
}

impl<'a> LiveGuard<'a> {
    fn new(live: &'a AtomicUsize) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { live }
    }
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_line() {
        let traceback = "Traceback (most recent call last):\n  File \"main.py\", line 1\nValueError: x\n\n";
        assert_eq!(last_error_line(traceback).as_deref(), Some("ValueError: x"));
        assert_eq!(last_error_line("  \n"), None);
    }

    #[tokio::test]
    async fn test_read_capped_drains_everything() {
        let data = vec![b'a'; 20_000];
        let (kept, truncated) = read_capped(&data[..], 100).await.unwrap();
        assert_eq!(kept.len(), 100);
        assert!(truncated);

        let (kept, truncated) = read_capped(&data[..], 20_000).await.unwrap();
        assert_eq!(kept.len(), 20_000);
        assert!(!truncated);
    }

    #[test]
    fn test_compose_source_prepends_prelude() {
        assert_eq!(
            compose_source("import math", "print(math.pi)"),
            "import math\nprint(math.pi)\n"
        );
        assert_eq!(compose_source("", "print(1)"), "print(1)");
    }

    #[test]
    fn test_compose_source_keeps_future_imports_first() {
        let source = "from __future__ import annotations\nfrom __future__ import division\nprint(1)";
        assert_eq!(
            compose_source("import sys", source),
            "from __future__ import annotations\nfrom __future__ import division\nimport sys\nprint(1)\n"
        );
    }

    #[test]
    fn test_group_guard_kill_is_idempotent() {
        let mut guard = ProcessGroupGuard::new(None);
        guard.kill();
        assert!(guard.pgid.is_none());
        drop(guard);
    }

    #[tokio::test]
    async fn test_guardrails_reject_oversized_payloads() {
        let engine = LocalEngine::new(&SandboxConfig::default());
        let limits = ExecutionLimits::default();

        let big_source = "x".repeat(MAX_SOURCE_CODE_BYTES + 1);
        let err = engine.run(&big_source, "", &limits).await.unwrap_err();
        assert!(matches!(err, EngineError::InputTooLarge { what: "source code", .. }));

        let big_input = "1".repeat(MAX_TEST_INPUT_BYTES + 1);
        let err = engine.run("print(1)", &big_input, &limits).await.unwrap_err();
        assert!(matches!(err, EngineError::InputTooLarge { what: "test input", .. }));
        assert_eq!(engine.live_processes(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_runs() {
        let engine = LocalEngine::new(&SandboxConfig::default());
        engine.close();
        let err = engine
            .run("print(1)", "", &ExecutionLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PoolClosed));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            interpreter: vec!["tracejudge-no-such-interpreter".into()],
            ..Default::default()
        };
        let engine = LocalEngine::with_work_root(&config, dir.path());

        let err = engine
            .run("print(1)", "", &ExecutionLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
        // workspace removed even though nothing ran
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
