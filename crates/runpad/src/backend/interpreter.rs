//! Embedded interpreter backend
//!
//! Stateless compile-and-run. Every call gets a fresh scratch directory, so
//! nothing survives between runs. Program output is forwarded line by line to
//! the chunk sink as one stream.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

use crate::backend::{
    BackendProfile, ChunkSink, ExecutionBackend, ExecutionFault, resolve_command,
};
use crate::config::{CompileConfig, Config, Language};
use crate::types::{ExecutionOutput, ExecutionResult, RunLimits};

/// Stateless backend that compiles and runs each submission from scratch
#[derive(Debug, Clone)]
pub struct EmbeddedInterpreter {
    language: Language,
    profile: BackendProfile,
    limits: RunLimits,
}

impl EmbeddedInterpreter {
    pub fn new(language: Language, limits: RunLimits) -> Self {
        Self {
            profile: language.profile(),
            language,
            limits,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.interpreter.clone(), config.limits.clone())
    }

    /// Effective limits for the compile step: global limits, then compile overrides
    fn compile_limits(&self, compile: &CompileConfig) -> RunLimits {
        match compile.limits {
            Some(ref limits) => self.limits.with_overrides(limits),
            None => self.limits.clone(),
        }
    }

    /// Effective limits for the run step: global limits, then run overrides
    fn run_limits(&self) -> RunLimits {
        match self.language.run.limits {
            Some(ref limits) => self.limits.with_overrides(limits),
            None => self.limits.clone(),
        }
    }

    async fn compile_and_run(
        &self,
        source: &str,
        sink: &mut dyn ChunkSink,
    ) -> Result<(), ExecutionFault> {
        let scratch = tempfile::Builder::new()
            .prefix("runpad-")
            .tempdir()
            .map_err(|e| {
                ExecutionFault::Transport(format!("failed to create scratch directory: {e}"))
            })?;

        let source_name = self.language.source_name();
        let mut contents = source.to_owned();
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        tokio::fs::write(scratch.path().join(&source_name), contents)
            .await
            .map_err(|e| ExecutionFault::Transport(format!("failed to write source: {e}")))?;

        debug!(source_name, "wrote source file");

        if let Some(ref compile) = self.language.compile {
            self.compile(scratch.path(), compile).await?;
        }

        self.run(scratch.path(), sink).await
    }

    #[instrument(skip(self, dir, compile))]
    async fn compile(&self, dir: &Path, compile: &CompileConfig) -> Result<(), ExecutionFault> {
        let limits = self.compile_limits(compile);
        let command = Language::expand_command(
            &compile.command,
            &compile.source_name,
            &compile.output_name,
        );

        let child = spawn(dir, command, compile.env.iter())?;
        let output = with_deadline(limits.wall_time(), child.wait_with_output())
            .await?
            .map_err(|e| ExecutionFault::Transport(format!("compiler failed: {e}")))?;

        debug!(
            success = output.status.success(),
            exit_code = ?output.status.code(),
            "compilation complete"
        );

        if output.status.success() {
            return Ok(());
        }

        // Combine stdout and stderr for compiler output
        let mut message = String::from_utf8_lossy(&output.stdout).trim_end().to_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim_end();
        if !message.is_empty() && !stderr.is_empty() {
            message.push('\n');
        }
        message.push_str(stderr);

        if message.is_empty() {
            message = match output.status.code() {
                Some(code) => format!("compilation failed with exit code {code}"),
                None => "compilation was terminated".to_owned(),
            };
        }

        Err(ExecutionFault::Interpreter(message))
    }

    #[instrument(skip(self, dir, sink))]
    async fn run(&self, dir: &Path, sink: &mut dyn ChunkSink) -> Result<(), ExecutionFault> {
        let limits = self.run_limits();
        let command = Language::expand_command(
            &self.language.run.command,
            &self.language.source_name(),
            &self.language.binary_name(),
        );

        let mut child = spawn(dir, command, self.language.run.env.iter())?;
        let pumped = with_deadline(
            limits.wall_time(),
            pump_output(&mut child, sink, limits.max_output),
        )
        .await;

        let status = match pumped {
            Ok(Ok(status)) => status,
            Ok(Err(fault)) | Err(fault) => {
                if let Err(e) = child.kill().await {
                    debug!(?e, "program already exited");
                }
                return Err(fault);
            }
        };

        if let Some(signal) = terminating_signal(&status) {
            return Err(ExecutionFault::Interpreter(format!(
                "program terminated by signal {signal}"
            )));
        }

        debug!(exit_code = ?status.code(), "program exited");
        Ok(())
    }
}

impl ExecutionBackend for EmbeddedInterpreter {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    #[instrument(skip(self, source, sink), fields(len = source.len()))]
    async fn execute(&self, source: &str, sink: &mut dyn ChunkSink) -> ExecutionResult {
        match self.compile_and_run(source, sink).await {
            Ok(()) => ExecutionResult::Output(ExecutionOutput::Streamed),
            Err(fault) => {
                debug!(%fault, "run faulted");
                ExecutionResult::Fault(fault)
            }
        }
    }
}

/// Spawn a command inside the scratch directory
fn spawn<'a>(
    dir: &Path,
    mut command: Vec<String>,
    env: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<Child, ExecutionFault> {
    // Relative programs like `./main` live in the scratch directory
    let local = command
        .first()
        .and_then(|p| p.strip_prefix("./"))
        .map(|local| dir.join(local).to_string_lossy().into_owned());
    if let Some(local) = local {
        command[0] = local;
    }
    resolve_command(&mut command)
        .map_err(|program| ExecutionFault::Interpreter(format!("command '{program}' not found")))?;

    let program = command
        .first()
        .ok_or_else(|| ExecutionFault::Transport("empty command".to_owned()))?;

    debug!(?command, "spawning");

    Command::new(program)
        .args(&command[1..])
        .current_dir(dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecutionFault::Transport(format!("failed to spawn '{program}': {e}")))
}

/// Await `fut`, failing with [`ExecutionFault::TimedOut`] past the deadline
async fn with_deadline<F>(limit: Option<Duration>, fut: F) -> Result<F::Output, ExecutionFault>
where
    F: std::future::Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            warn!(?limit, "wall time exceeded");
            ExecutionFault::TimedOut(limit.as_secs_f64())
        }),
        None => Ok(fut.await),
    }
}

/// Forward stdout and stderr to the sink line by line until both close
///
/// Each stream is read through a byte budget, so a line that never ends
/// still trips the output limit.
async fn pump_output(
    child: &mut Child,
    sink: &mut dyn ChunkSink,
    max_output_kb: Option<u64>,
) -> Result<ExitStatus, ExecutionFault> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(ExecutionFault::Transport(
            "program output was not captured".to_owned(),
        ));
    };

    let mut stdout = BufReader::new(stdout).take(u64::MAX);
    let mut stderr = BufReader::new(stderr).take(u64::MAX);
    let mut stdout_line = Vec::new();
    let mut stderr_line = Vec::new();
    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut forwarder = Forwarder {
        sink,
        written: 0,
        max_output_kb,
    };

    while !(stdout_closed && stderr_closed) {
        stdout.set_limit(forwarder.budget(&stdout_line));
        stderr.set_limit(forwarder.budget(&stderr_line));

        tokio::select! {
            read = stdout.read_until(b'\n', &mut stdout_line), if !stdout_closed => {
                stdout_closed = forwarder.forward(read, &mut stdout_line)?;
            }
            read = stderr.read_until(b'\n', &mut stderr_line), if !stderr_closed => {
                stderr_closed = forwarder.forward(read, &mut stderr_line)?;
            }
        }
    }

    child
        .wait()
        .await
        .map_err(|e| ExecutionFault::Transport(format!("failed to wait for program: {e}")))
}

struct Forwarder<'a> {
    sink: &'a mut dyn ChunkSink,
    written: u64,
    max_output_kb: Option<u64>,
}

impl Forwarder<'_> {
    fn max_bytes(&self) -> Option<u64> {
        self.max_output_kb.map(|kb| kb.saturating_mul(1024))
    }

    /// Bytes a stream may read before its pending line breaks the limit
    fn budget(&self, pending: &[u8]) -> u64 {
        match self.max_bytes() {
            Some(max) => max
                .saturating_sub(self.written.saturating_add(pending.len() as u64))
                .saturating_add(1),
            None => u64::MAX,
        }
    }

    /// Forward a completed read. Returns whether the stream reached EOF.
    fn forward(
        &mut self,
        read: std::io::Result<usize>,
        line: &mut Vec<u8>,
    ) -> Result<bool, ExecutionFault> {
        let eof = match read {
            Ok(n) => n == 0,
            Err(e) => {
                debug!(?e, "output stream read error");
                true
            }
        };

        if !line.is_empty() {
            self.written = self.written.saturating_add(line.len() as u64);
            if let (Some(kb), Some(max)) = (self.max_output_kb, self.max_bytes())
                && self.written > max
            {
                return Err(ExecutionFault::OutputLimit(kb));
            }
            self.sink.write(&String::from_utf8_lossy(line));
            line.clear();
        }

        Ok(eof)
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
