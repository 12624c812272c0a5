//! Per-session mutable state and lifecycle phases.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::LaunchArguments;
use crate::runtime::RuntimeService;
use crate::session::output::OutputClassifier;

/// How the session reached its application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// The runner builds and starts the application.
    Launch,
    /// The runner attaches to an already running application.
    Attach,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launch => f.write_str("launch"),
            Self::Attach => f.write_str("attach"),
        }
    }
}

/// Lifecycle phase of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No launch or attach request yet.
    Idle,
    /// Runner being spawned.
    Launching,
    /// Runner up; waiting for the application to report ready.
    WaitingForAppStart,
    /// Connecting to the runtime introspection service.
    Connecting,
    /// Application running.
    Running,
    /// Hot reload or hot restart in flight.
    Reloading,
    /// Quit command sent; waiting for teardown.
    Terminating,
    /// Torn down.
    Terminated,
}

impl SessionPhase {
    /// Check whether a transition from `self` to `next` is valid.
    ///
    /// Valid transitions:
    /// - `Idle` → `Launching`
    /// - `Launching` → `WaitingForAppStart`
    /// - `WaitingForAppStart` → `Connecting` | `Running`
    /// - `Connecting` → `Running`
    /// - `Running` ↔ `Reloading`
    /// - any live phase → `Terminating` | `Terminated`
    /// - `Terminating` → `Terminated`
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionPhase::{
            Connecting, Idle, Launching, Reloading, Running, Terminated, Terminating,
            WaitingForAppStart,
        };
        matches!(
            (self, next),
            (Idle, Launching)
                | (Launching, WaitingForAppStart)
                | (WaitingForAppStart, Connecting | Running)
                | (Connecting, Running)
                | (Running, Reloading)
                | (Reloading, Running)
                | (
                    Idle | Launching | WaitingForAppStart | Connecting | Running | Reloading,
                    Terminating
                )
                | (
                    Idle
                        | Launching
                        | WaitingForAppStart
                        | Connecting
                        | Running
                        | Reloading
                        | Terminating,
                    Terminated
                )
        )
    }

    /// Whether the session has begun shutting down.
    #[must_use]
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

/// Handle to the running application as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    /// Runner-assigned application id.
    pub app_id: String,
    /// Device the app runs on.
    pub device_id: Option<String>,
    /// Project directory reported by the runner.
    pub directory: Option<String>,
    /// Whether the runner can hot reload this app.
    pub supports_restart: bool,
}

/// State of the runtime service connection.
#[derive(Clone, Default)]
pub enum RuntimeLink {
    /// Never attempted.
    #[default]
    Disconnected,
    /// Attempt in flight.
    Connecting,
    /// Connected.
    Connected(Arc<dyn RuntimeService>),
    /// Attempt failed; never retried.
    Failed,
    /// Connection closed after being established.
    Closed,
}

impl RuntimeLink {
    /// Connected service, if any.
    #[must_use]
    pub fn service(&self) -> Option<Arc<dyn RuntimeService>> {
        match self {
            Self::Connected(service) => Some(Arc::clone(service)),
            _ => None,
        }
    }
}

impl fmt::Debug for RuntimeLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected(_) => "Connected",
            Self::Failed => "Failed",
            Self::Closed => "Closed",
        };
        f.write_str(label)
    }
}

/// Maps runtime isolate ids onto the integer thread ids the client expects.
#[derive(Debug, Clone, Default)]
pub struct ThreadTable {
    isolates: Vec<String>,
}

impl ThreadTable {
    /// Thread id for `isolate_id`, allocating one on first sight.
    pub fn id_for(&mut self, isolate_id: &str) -> i64 {
        let index = self
            .isolates
            .iter()
            .position(|known| known == isolate_id)
            .unwrap_or_else(|| {
                self.isolates.push(isolate_id.to_owned());
                self.isolates.len() - 1
            });
        i64::try_from(index).map_or(i64::MAX, |i| i + 1)
    }

    /// Isolate id behind `thread_id`.
    #[must_use]
    pub fn isolate_for(&self, thread_id: i64) -> Option<&str> {
        let index = usize::try_from(thread_id.checked_sub(1)?).ok()?;
        self.isolates.get(index).map(String::as_str)
    }
}

/// Everything a session knows about its runner and application.
#[derive(Debug)]
pub struct SessionState {
    /// Unique session identifier.
    pub id: String,
    /// Launch or attach; `None` until the first request.
    pub kind: Option<SessionKind>,
    /// Arguments of the launch or attach request.
    pub arguments: LaunchArguments,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Running application, once `app.start` arrives.
    pub app: Option<AppInstance>,
    /// Runtime service endpoint, once announced.
    pub service_uri: Option<String>,
    /// Set by the ready event.
    pub app_has_started: bool,
    /// The client asked to run without a debugger.
    pub no_debug_requested: bool,
    /// Runtime service connection.
    pub runtime: RuntimeLink,
    /// Extra processes reported by the runner, killed on teardown.
    pub auxiliary_pids: Vec<u32>,
    /// Severity classifier for program output.
    pub output: OutputClassifier,
    /// Isolate ↔ thread id mapping.
    pub threads: ThreadTable,
    /// Creation timestamp.
    pub started_at: DateTime<Utc>,
}

impl SessionState {
    /// Fresh idle state with a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: None,
            arguments: LaunchArguments::default(),
            phase: SessionPhase::Idle,
            app: None,
            service_uri: None,
            app_has_started: false,
            no_debug_requested: false,
            runtime: RuntimeLink::Disconnected,
            auxiliary_pids: Vec::new(),
            output: OutputClassifier::default(),
            threads: ThreadTable::default(),
            started_at: Utc::now(),
        }
    }

    /// Move to `next` if the transition is valid; invalid moves are logged
    /// and ignored.
    pub fn transition(&mut self, next: SessionPhase) -> bool {
        if self.phase == next {
            return true;
        }
        if self.phase.can_transition_to(next) {
            self.phase = next;
            true
        } else {
            warn!(from = ?self.phase, to = ?next, session_id = %self.id, "ignoring invalid phase transition");
            false
        }
    }

    /// Whether every precondition for connecting to the runtime holds.
    ///
    /// Requires a known endpoint, a started app, debugging enabled and no
    /// earlier connection attempt.
    #[must_use]
    pub fn connection_gate_open(&self) -> bool {
        self.service_uri.is_some()
            && self.app_has_started
            && !self.no_debug_requested
            && matches!(self.runtime, RuntimeLink::Disconnected)
            && !self.phase.is_shutting_down()
    }

    /// Current application id.
    #[must_use]
    pub fn app_id(&self) -> Option<String> {
        self.app.as_ref().map(|app| app.app_id.clone())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
