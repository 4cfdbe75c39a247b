//! Command executor
//!
//! Spawns a job's process, wires its stdout/stderr into the run's event
//! stream and enforces the wall-clock timeout. On timeout or cancel the
//! process group receives SIGTERM, then SIGKILL once `term_grace` passes.
//!
//! At most one process may be active per run id. The registration is held
//! by a guard, so the entry disappears on every exit path, including a
//! dropped future.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tether_core::domain::event::{EventLevel, RunEvent};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event_stream::EventEmitter;
use super::output_queue::MAX_LINE_BYTES;

/// How long to wait for pipe readers once the process is gone
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A fully resolved command
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Written to the process's stdin, which is then closed
    pub stdin: Option<Vec<u8>>,
    pub current_dir: Option<PathBuf>,
    /// Keep up to this many bytes of stdout instead of emitting it as events
    pub capture_stdout: Option<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn capture_stdout(mut self, limit: usize) -> Self {
        self.capture_stdout = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The process exited on its own; `code` is `None` if a signal killed it
    Exited { code: Option<i32> },
    TimedOut,
    Canceled,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExecOutcome::Exited { code: Some(0) })
    }
}

#[derive(Debug)]
pub struct ExecReport {
    pub outcome: ExecOutcome,
    /// Captured stdout, empty unless `capture_stdout` was set
    pub stdout: Vec<u8>,
    /// Stdout exceeded the capture limit
    pub stdout_overflow: bool,
    pub duration: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("run {0} already has an active process")]
    AlreadyActive(Uuid),

    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

type ActiveMap = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ActiveGuard {
    active: ActiveMap,
    run_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.run_id);
    }
}

#[derive(Clone)]
pub struct CommandExecutor {
    active: ActiveMap,
    term_grace: Duration,
}

impl CommandExecutor {
    pub fn new(term_grace: Duration) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            term_grace,
        }
    }

    pub fn is_active(&self, run_id: Uuid) -> bool {
        lock(&self.active).contains_key(&run_id)
    }

    pub fn active_runs(&self) -> usize {
        lock(&self.active).len()
    }

    /// Asks the process of an active run to stop. Returns false if the run
    /// has no active process.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match lock(&self.active).get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs `spec` to completion, timeout or cancellation.
    pub async fn run(
        &self,
        run_id: Uuid,
        spec: CommandSpec,
        timeout: Duration,
        emitter: &EventEmitter,
        cancel: CancellationToken,
    ) -> Result<ExecReport, ExecError> {
        if spec.program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let _guard = self.register(run_id, cancel.clone())?;
        let started = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        tracing::debug!(
            "Spawned {} for run {} (pid {:?})",
            spec.program,
            run_id,
            child.id()
        );

        let stdin_task = match (child.stdin.take(), spec.stdin) {
            (Some(mut pipe), Some(bytes)) => Some(tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&bytes).await {
                    tracing::debug!("Process closed stdin early: {}", e);
                }
                let _ = pipe.shutdown().await;
            })),
            _ => None,
        };

        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(read_stdout(out, spec.capture_stdout, emitter.clone()))
        });
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_lines(err, EventLevel::Error, emitter.clone())));

        let deadline = tokio::time::Instant::now() + timeout;
        let outcome = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(ExecError::Wait)?;
                ExecOutcome::Exited { code: status.code() }
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!("Run {} timed out after {:?}; terminating", run_id, timeout);
                emitter.warning(format!(
                    "command timed out after {}s; terminating",
                    timeout.as_secs()
                ));
                self.terminate(&mut child, run_id).await;
                ExecOutcome::TimedOut
            }
            _ = cancel.cancelled() => {
                tracing::info!("Run {} canceled; terminating", run_id);
                emitter.warning("cancel requested; terminating");
                self.terminate(&mut child, run_id).await;
                ExecOutcome::Canceled
            }
        };

        if let Some(task) = stdin_task {
            task.abort();
        }
        let (stdout, stdout_overflow) = join_reader(stdout_task, run_id, "stdout")
            .await
            .unwrap_or_default();
        join_reader(stderr_task, run_id, "stderr").await;

        let duration = started.elapsed();
        tracing::info!("Run {} finished: {:?} after {:?}", run_id, outcome, duration);

        Ok(ExecReport {
            outcome,
            stdout,
            stdout_overflow,
            duration,
        })
    }

    fn register(&self, run_id: Uuid, token: CancellationToken) -> Result<ActiveGuard, ExecError> {
        let mut active = lock(&self.active);
        if active.contains_key(&run_id) {
            return Err(ExecError::AlreadyActive(run_id));
        }
        active.insert(run_id, token);

        Ok(ActiveGuard {
            active: Arc::clone(&self.active),
            run_id,
        })
    }

    /// SIGTERM, wait up to `term_grace`, then SIGKILL.
    async fn terminate(&self, child: &mut Child, run_id: Uuid) {
        signal_group(child, Termination::Graceful);

        if tokio::time::timeout(self.term_grace, child.wait())
            .await
            .is_ok()
        {
            return;
        }

        tracing::warn!(
            "Run {} ignored SIGTERM for {:?}; killing",
            run_id,
            self.term_grace
        );
        signal_group(child, Termination::Forced);
        if let Err(e) = child.kill().await {
            tracing::warn!("Failed to kill process of run {}: {}", run_id, e);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Termination {
    Graceful,
    Forced,
}

#[cfg(unix)]
fn signal_group(child: &Child, termination: Termination) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let signal = match termination {
        Termination::Graceful => Signal::SIGTERM,
        Termination::Forced => Signal::SIGKILL,
    };
    let pid = Pid::from_raw(pid as i32);
    if signal::killpg(pid, signal).is_err() {
        let _ = signal::kill(pid, signal);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _termination: Termination) {
    let _ = child.start_kill();
}

async fn read_stdout<R: AsyncRead + Unpin>(
    reader: R,
    capture: Option<usize>,
    emitter: EventEmitter,
) -> std::io::Result<(Vec<u8>, bool)> {
    match capture {
        Some(limit) => capture_bounded(reader, limit).await,
        None => pump_lines(reader, EventLevel::Info, emitter)
            .await
            .map(|()| (Vec::new(), false)),
    }
}

/// Emits each line as an event. Invalid UTF-8 is replaced, not rejected.
///
/// A line never grows past [`MAX_LINE_BYTES`] in memory: once that much has
/// been read without a newline the segment is emitted and reading goes on.
async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    level: EventLevel,
    emitter: EventEmitter,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if !line.is_empty() {
                emit_line(&emitter, level, &line);
            }
            return Ok(());
        }

        let room = MAX_LINE_BYTES - line.len();
        let window = &available[..available.len().min(room)];
        match window.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                line.extend_from_slice(&window[..pos]);
                reader.consume(pos + 1);
                emit_line(&emitter, level, &line);
                line.clear();
            }
            None => {
                let taken = window.len();
                line.extend_from_slice(window);
                reader.consume(taken);
                if line.len() >= MAX_LINE_BYTES {
                    let split = utf8_boundary(&line);
                    emit_line(&emitter, level, &line[..split]);
                    line.drain(..split);
                }
            }
        }
    }
}

fn emit_line(emitter: &EventEmitter, level: EventLevel, bytes: &[u8]) {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    emitter.emit(RunEvent::new(level, String::from_utf8_lossy(bytes)));
}

/// Longest prefix of `bytes` that does not cut a UTF-8 sequence in half.
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
        _ => bytes.len(),
    }
}

/// Keeps the first `limit` bytes and keeps draining the pipe past it.
async fn capture_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut overflow = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok((kept, overflow));
        }
        if overflow {
            continue;
        }
        let room = limit - kept.len();
        if n > room {
            kept.extend_from_slice(&chunk[..room]);
            overflow = true;
        } else {
            kept.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn join_reader<T>(
    task: Option<JoinHandle<std::io::Result<T>>>,
    run_id: Uuid,
    name: &str,
) -> Option<T> {
    let mut task = task?;

    match tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            tracing::warn!("Reading {} of run {} failed: {}", name, run_id, e);
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("{} reader of run {} panicked: {}", name, run_id, e);
            None
        }
        Err(_) => {
            tracing::warn!(
                "{} of run {} still open after exit; a background process may hold it",
                name,
                run_id
            );
            task.abort();
            None
        }
    }
}
