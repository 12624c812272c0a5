//! Runner process spawning.
//!
//! [`ProcessSpawner`] is the seam between the driver and the operating
//! system. [`TokioSpawner`] launches a real child with piped stdio and
//! `kill_on_drop(true)`; tests substitute in-memory pipes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::info;

use crate::{AppError, Result};

/// Everything needed to start one runner process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    /// Executable name or path.
    pub executable: String,
    /// Working directory; inherits the bridge's when absent.
    pub cwd: Option<PathBuf>,
    /// Full argument list.
    pub args: Vec<String>,
    /// Variables added to the inherited environment.
    pub env: HashMap<String, String>,
}

/// Boxed writer half handed to the driver.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Boxed reader half handed to the driver.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A started runner: its stdio plus the OS handle when there is one.
pub struct SpawnedProcess {
    /// Command channel (runner stdin).
    pub stdin: BoxedWriter,
    /// Protocol stream (runner stdout).
    pub stdout: BoxedReader,
    /// Diagnostic stream (runner stderr), if captured.
    pub stderr: Option<BoxedReader>,
    /// OS child handle; `None` for in-memory transports.
    pub child: Option<Child>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Capability for creating runner processes.
pub trait ProcessSpawner: Send + Sync {
    /// Start `command` and hand back its stdio.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be created.
    fn spawn(&self, command: &RunnerCommand) -> Result<SpawnedProcess>;
}

/// Spawns real OS processes through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, command: &RunnerCommand) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&command.executable);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", command.executable))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture runner stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture runner stdout".into()))?;
        let stderr = child.stderr.take();

        info!(
            pid = child.id().unwrap_or(0),
            executable = %command.executable,
            args = ?command.args,
            "runner process spawned"
        );

        Ok(SpawnedProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as BoxedReader),
            child: Some(child),
        })
    }
}
