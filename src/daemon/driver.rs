//! Runner process driver.
//!
//! Owns one spawned runner process and turns its stdio into:
//!
//! - typed [`DaemonEvent`]s delivered through an [`EventBus`],
//! - correlated request/response pairs for outbound commands.
//!
//! # Tasks
//!
//! | Task       | Role                                                        |
//! |------------|-------------------------------------------------------------|
//! | writer     | drains the command channel into runner stdin (framed)       |
//! | stdout     | decodes lines, completes pending commands, publishes events |
//! | stderr     | publishes every line as unhandled `stderr` output           |
//! | supervisor | waits for exit or dispose, fails pending, publishes `Exited`|
//!
//! Correlation ids come from a monotonically increasing counter. Each
//! pending command resolves exactly once: with the runner's response, with
//! `RequestTimeout` (the entry is orphaned and a late response is dropped),
//! or with `ProcessExited` when the transport goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::daemon::bus::EventBus;
use crate::daemon::codec::DaemonCodec;
use crate::daemon::events::{DaemonEvent, OutputStream};
use crate::daemon::protocol::{self, DaemonMessage};
use crate::daemon::spawner::{BoxedReader, BoxedWriter, ProcessSpawner, RunnerCommand};
use crate::{AppError, Result};

/// How long the supervisor waits for buffered stdout after the process ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the outbound command channel.
const WRITER_CAPACITY: usize = 64;

/// Direction of a raw runner line, for the traffic side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    /// Runner → bridge.
    Inbound,
    /// Bridge → runner.
    Outbound,
}

/// Fire-and-forget observer of raw runner traffic.
pub type TrafficObserver = Arc<dyn Fn(TrafficDirection, &str) + Send + Sync>;

/// Driver tuning.
#[derive(Clone)]
pub struct DriverOptions {
    /// Deadline for [`ProcessDriver::send_command`].
    pub command_timeout: Duration,
    /// Optional raw traffic observer.
    pub traffic: Option<TrafficObserver>,
}

impl std::fmt::Debug for DriverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverOptions")
            .field("command_timeout", &self.command_timeout)
            .field("traffic", &self.traffic.is_some())
            .finish()
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            traffic: None,
        }
    }
}

type Completion = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct PendingCommands {
    closed: bool,
    waiting: HashMap<u64, Completion>,
}

type SharedPending = Arc<Mutex<PendingCommands>>;

/// Handle to a running runner process.
pub struct ProcessDriver {
    bus: EventBus,
    next_id: AtomicU64,
    pending: SharedPending,
    writer_tx: mpsc::Sender<String>,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
    options: DriverOptions,
    pid: Option<u32>,
}

impl std::fmt::Debug for ProcessDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDriver")
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ProcessDriver {
    /// Spawn the runner and begin consuming its output.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be created.
    pub fn start(
        spawner: &dyn ProcessSpawner,
        command: &RunnerCommand,
        bus: EventBus,
        options: DriverOptions,
    ) -> Result<Self> {
        let process = spawner.spawn(command)?;
        let pid = process.child.as_ref().and_then(tokio::process::Child::id);

        let pending: SharedPending = Arc::new(Mutex::new(PendingCommands::default()));
        let exited = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CAPACITY);

        let span = info_span!("runner", pid = pid.unwrap_or(0));

        tokio::spawn(
            run_writer(process.stdin, writer_rx, options.traffic.clone(), cancel.clone())
                .instrument(span.clone()),
        );

        let stdout_task = tokio::spawn(
            run_stdout_reader(
                process.stdout,
                bus.clone(),
                Arc::clone(&pending),
                options.traffic.clone(),
                cancel.clone(),
            )
            .instrument(span.clone()),
        );

        if let Some(stderr) = process.stderr {
            tokio::spawn(
                run_stderr_reader(stderr, bus.clone(), cancel.clone()).instrument(span.clone()),
            );
        }

        tokio::spawn(
            supervise(
                process.child,
                stdout_task,
                bus.clone(),
                Arc::clone(&pending),
                Arc::clone(&exited),
                cancel.clone(),
            )
            .instrument(span),
        );

        info!(executable = %command.executable, "runner driver started");

        Ok(Self {
            bus,
            next_id: AtomicU64::new(1),
            pending,
            writer_tx,
            exited,
            cancel,
            options,
            pid,
        })
    }

    /// Subscribe to every future event of `kind`.
    pub fn register_handler<F>(&self, kind: crate::daemon::events::EventKind, handler: F)
    where
        F: Fn(&DaemonEvent) + Send + Sync + 'static,
    {
        self.bus.register_handler(kind, handler);
    }

    /// Send a correlated command with the default deadline.
    ///
    /// # Errors
    ///
    /// - `AppError::RequestTimeout` if no response arrives in time.
    /// - `AppError::ProcessExited` if the runner is gone.
    /// - `AppError::Command` if the runner answers with an error.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send_command_within(method, params, self.options.command_timeout)
            .await
    }

    /// Send a correlated command with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Same as [`send_command`](Self::send_command).
    pub async fn send_command_within(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(AppError::ProcessExited(format!(
                    "cannot send {method}: runner is not running"
                )));
            }
            pending.waiting.insert(id, tx);
        }

        let line = protocol::encode_command(id, method, &params);
        debug!(id, method, "sending runner command");

        if self.writer_tx.send(line).await.is_err() {
            self.pending.lock().await.waiting.remove(&id);
            return Err(AppError::ProcessExited(format!(
                "cannot send {method}: command channel closed"
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AppError::ProcessExited(format!(
                "runner exited before answering {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.waiting.remove(&id);
                warn!(id, method, ?timeout, "runner command timed out");
                Err(AppError::RequestTimeout {
                    method: method.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Whether the runner is still considered alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    /// OS process id, when the runner is a real process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminate the runner if still running. Idempotent.
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!(pid = self.pid.unwrap_or(0), "disposing runner");
            self.cancel.cancel();
        }
    }
}

impl Drop for ProcessDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_writer(
    stdin: BoxedWriter,
    mut rx: mpsc::Receiver<String>,
    traffic: Option<TrafficObserver>,
    cancel: CancellationToken,
) {
    let mut framed = FramedWrite::new(stdin, DaemonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("runner writer: cancellation received, stopping");
                break;
            }

            line = rx.recv() => {
                let Some(line) = line else {
                    debug!("runner writer: command channel closed, stopping");
                    break;
                };
                if let Some(observer) = &traffic {
                    observer(TrafficDirection::Outbound, &line);
                }
                if let Err(err) = framed.send(line).await {
                    warn!(error = %err, "runner writer: write to stdin failed");
                    break;
                }
            }
        }
    }
}

async fn run_stdout_reader(
    stdout: BoxedReader,
    bus: EventBus,
    pending: SharedPending,
    traffic: Option<TrafficObserver>,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(stdout, DaemonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("runner stdout: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("runner stdout: EOF");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "runner stdout: read error, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        if let Some(observer) = &traffic {
                            observer(TrafficDirection::Inbound, &line);
                        }
                        dispatch_line(&line, &bus, &pending).await;
                    }
                }
            }
        }
    }
}

async fn dispatch_line(line: &str, bus: &EventBus, pending: &SharedPending) {
    match protocol::parse_line(line) {
        DaemonMessage::Event(event) => {
            bus.publish(&event);
        }
        DaemonMessage::Response { id, outcome } => {
            let waiter = pending.lock().await.waiting.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(outcome.map_err(AppError::Command));
                }
                None => debug!(id, "runner response without a pending command, dropping"),
            }
        }
        DaemonMessage::Unhandled(text) => {
            bus.publish(&DaemonEvent::UnhandledOutput {
                line: text,
                stream: OutputStream::Stdout,
            });
        }
    }
}

async fn run_stderr_reader(stderr: BoxedReader, bus: EventBus, cancel: CancellationToken) {
    let mut framed = FramedRead::new(stderr, DaemonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => match item {
                None => break,
                Some(Ok(line)) => {
                    bus.publish(&protocol::stderr_line(line));
                }
                Some(Err(err)) => {
                    warn!(error = %err, "runner stderr: read error, stopping");
                    break;
                }
            }
        }
    }
}

async fn supervise(
    child: Option<tokio::process::Child>,
    mut stdout_task: JoinHandle<()>,
    bus: EventBus,
    pending: SharedPending,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut reader_done = false;

    let code = if let Some(mut child) = child {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(%err, "error waiting for runner process");
                    None
                }
            },
            () = cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to kill runner process");
                }
                None
            }
        }
    } else {
        tokio::select! {
            _ = &mut stdout_task => reader_done = true,
            () = cancel.cancelled() => {}
        }
        None
    };

    if !reader_done && tokio::time::timeout(DRAIN_TIMEOUT, &mut stdout_task).await.is_err() {
        debug!("runner stdout did not drain in time");
    }
    cancel.cancel();

    exited.store(true, Ordering::SeqCst);
    let orphaned = {
        let mut pending = pending.lock().await;
        pending.closed = true;
        pending.waiting.drain().collect::<Vec<_>>()
    };
    for (id, tx) in orphaned {
        debug!(id, "failing pending runner command: process exited");
        let _ = tx.send(Err(AppError::ProcessExited(
            "runner exited before answering".into(),
        )));
    }

    info!(?code, "runner process exited");
    bus.publish(&DaemonEvent::Exited { code });
}
