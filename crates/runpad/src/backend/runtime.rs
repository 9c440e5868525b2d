//! Managed runtime backend
//!
//! Keeps one Python process alive for the whole session. The process runs an
//! embedded driver that swaps `sys.stdout`/`sys.stderr` for capture buffers,
//! evaluates each request in a persistent namespace and answers with one JSON
//! line per request.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    BackendProfile, ChunkSink, ExecutionBackend, ExecutionFault, InitError, SharedBootstrap,
    resolve_command,
};
use crate::config::{Config, RuntimeConfig};
use crate::types::{ExecutionOutput, ExecutionResult, RunLimits};

/// Driver script passed to the runtime command via `{driver}`
pub const DRIVER_SCRIPT: &str = include_str!("driver.py");

#[derive(Debug, Error)]
enum ProtocolError {
    #[error("I/O error talking to runtime: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime exited unexpectedly")]
    Closed,

    #[error("malformed runtime reply: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct Handshake {
    ready: bool,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug)]
struct RuntimeProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// A request was sent and its reply never read
    interrupted: bool,
}

impl RuntimeProcess {
    async fn read_reply_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line).await? == 0 {
            return Err(ProtocolError::Closed);
        }
        Ok(line)
    }

    async fn exchange(&mut self, code: &str) -> Result<Response, ProtocolError> {
        let mut request = serde_json::to_string(&Request { code })?;
        request.push('\n');
        self.interrupted = true;
        self.stdin.write_all(request.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self.read_reply_line().await?;
        self.interrupted = false;
        Ok(serde_json::from_str(&reply)?)
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(?e, "runtime process already gone");
        }
    }
}

#[derive(Debug)]
struct RuntimeHandle {
    process: tokio::sync::Mutex<RuntimeProcess>,
    version: String,
}

/// Stateful backend backed by a persistent Python process
#[derive(Debug)]
pub struct ManagedRuntime {
    config: Arc<RuntimeConfig>,
    profile: BackendProfile,
    limits: RunLimits,
    bootstrap: SharedBootstrap<Arc<RuntimeHandle>, InitError>,
}

impl ManagedRuntime {
    pub fn new(config: RuntimeConfig, limits: RunLimits) -> Self {
        Self {
            profile: config.profile(),
            config: Arc::new(config),
            limits,
            bootstrap: SharedBootstrap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runtime.clone(), config.runtime_limits())
    }

    /// Version reported by the runtime, once it is up
    pub fn version(&self) -> Option<String> {
        self.bootstrap.ready().map(|handle| handle.version.clone())
    }

    async fn handle(&self) -> Result<Arc<RuntimeHandle>, InitError> {
        self.bootstrap
            .get_or_start(|| bootstrap(self.config.clone()))
            .await
    }

    /// Handle to a process whose reply stream is in step with its requests
    ///
    /// A run dropped mid-request leaves its reply unread, so that process is
    /// replaced.
    async fn live_handle(&self) -> Result<Arc<RuntimeHandle>, InitError> {
        let handle = self.handle().await?;
        let mut process = handle.process.lock().await;
        if !process.interrupted {
            drop(process);
            return Ok(handle);
        }

        warn!("previous request was abandoned, restarting runtime");
        self.discard(&mut process).await;
        drop(process);
        self.handle().await
    }

    /// Kill a process whose protocol state can no longer be trusted
    ///
    /// The next run bootstraps a fresh process.
    async fn discard(&self, process: &mut RuntimeProcess) {
        process.kill().await;
        self.bootstrap.reset();
    }
}

#[instrument(skip(config), fields(runtime = %config.name))]
async fn bootstrap(config: Arc<RuntimeConfig>) -> Result<Arc<RuntimeHandle>, InitError> {
    let mut command = config.expand_command(DRIVER_SCRIPT);
    resolve_command(&mut command).map_err(InitError::CommandNotFound)?;

    debug!(program = %command[0], "starting runtime");

    let mut child = Command::new(&command[0])
        .args(&command[1..])
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InitError::Spawn(e.to_string()))?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(InitError::Spawn("runtime stdio was not captured".to_owned()));
    };

    let mut process = RuntimeProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
        interrupted: false,
    };

    // Unrepresentable timeouts are rejected by config validation
    let startup = Duration::try_from_secs_f64(config.startup_timeout).unwrap_or(Duration::MAX);
    let line = match tokio::time::timeout(startup, process.read_reply_line()).await {
        Ok(Ok(line)) => line,
        Ok(Err(ProtocolError::Closed)) => return Err(InitError::Exited),
        Ok(Err(e)) => return Err(InitError::Handshake(e.to_string())),
        Err(_) => {
            process.kill().await;
            return Err(InitError::StartupTimeout(config.startup_timeout));
        }
    };

    let handshake: Handshake =
        serde_json::from_str(&line).map_err(|e| InitError::Handshake(e.to_string()))?;
    if !handshake.ready {
        process.kill().await;
        return Err(InitError::Handshake("runtime reported not ready".to_owned()));
    }

    info!(version = %handshake.version, "runtime ready");

    Ok(Arc::new(RuntimeHandle {
        process: tokio::sync::Mutex::new(process),
        version: handshake.version,
    }))
}

impl ExecutionBackend for ManagedRuntime {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    fn is_prepared(&self) -> bool {
        self.bootstrap.is_ready()
    }

    async fn prepare(&self) -> Result<(), InitError> {
        self.handle().await.map(|_| ())
    }

    #[instrument(skip(self, source, _sink), fields(len = source.len()))]
    async fn execute(&self, source: &str, _sink: &mut dyn ChunkSink) -> ExecutionResult {
        let handle = match self.live_handle().await {
            Ok(handle) => handle,
            Err(e) => {
                return ExecutionResult::Fault(ExecutionFault::Transport(format!(
                    "{} runtime unavailable: {e}",
                    self.profile.name
                )));
            }
        };

        let mut process = handle.process.lock().await;
        let exchange = process.exchange(source);
        let reply = match self.limits.wall_time() {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(?limit, "run exceeded wall time, restarting runtime");
                    self.discard(&mut process).await;
                    return ExecutionResult::Fault(ExecutionFault::TimedOut(limit.as_secs_f64()));
                }
            },
            None => exchange.await,
        };

        match reply {
            Ok(Response {
                error: Some(error), ..
            }) => {
                debug!("user code raised");
                ExecutionResult::Fault(ExecutionFault::Raised(error))
            }
            Ok(Response {
                stdout,
                stderr,
                value,
                error: None,
            }) => {
                debug!(
                    stdout = stdout.len(),
                    stderr = stderr.len(),
                    has_value = value.is_some(),
                    "run complete"
                );
                ExecutionResult::Output(ExecutionOutput::Captured {
                    stdout,
                    stderr,
                    value,
                })
            }
            Err(e) => {
                warn!(%e, "runtime protocol failure, restarting runtime");
                self.discard(&mut process).await;
                ExecutionResult::Fault(ExecutionFault::Transport(e.to_string()))
            }
        }
    }

    async fn dispose(&self) {
        if let Some(handle) = self.bootstrap.ready() {
            handle.process.lock().await.kill().await;
        }
        self.bootstrap.reset();
    }
}
