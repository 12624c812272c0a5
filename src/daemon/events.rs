//! Typed runner events.

use serde_json::Value;

/// Which stream a free-form output line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Runner stdout (interleaved with protocol lines).
    Stdout,
    /// Runner stderr.
    Stderr,
}

/// Events published by the [`ProcessDriver`](crate::daemon::driver::ProcessDriver).
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    /// `daemon.connected`: the runner daemon is up.
    DaemonConnected {
        /// Runner protocol version.
        version: Option<String>,
        /// Auxiliary process id that may need force-termination later.
        pid: Option<u32>,
    },
    /// `daemon.logMessage`: diagnostic message from the runner itself.
    LogMessage {
        /// Severity reported by the runner (`info`, `warning`, `error`, ...).
        level: String,
        /// Message text.
        message: String,
        /// Optional stack trace.
        stack_trace: Option<String>,
    },
    /// `app.start`: the runner created an application instance.
    AppStart {
        /// Application instance handle.
        app_id: String,
        /// Device the app runs on.
        device_id: Option<String>,
        /// Project directory.
        directory: Option<String>,
        /// Whether the app supports hot restart.
        supports_restart: bool,
    },
    /// `app.debugPort`: runtime service endpoint announced.
    AppDebugPort {
        /// Application instance handle.
        app_id: String,
        /// WebSocket URI of the runtime service.
        ws_uri: String,
        /// Base URI for source mapping, when provided.
        base_uri: Option<String>,
    },
    /// `app.started`: the application finished starting.
    AppStarted {
        /// Application instance handle.
        app_id: String,
    },
    /// `app.stop`: the application stopped.
    AppStop {
        /// Application instance handle.
        app_id: String,
        /// Error text when the app stopped abnormally.
        error: Option<String>,
    },
    /// `app.progress`: long-running runner operation progress.
    AppProgress {
        /// Application instance handle.
        app_id: String,
        /// Progress identifier, stable across updates.
        progress_id: Option<String>,
        /// Progress message.
        message: Option<String>,
        /// Whether the operation completed.
        finished: bool,
    },
    /// `app.log`: application output relayed by the runner.
    AppLog {
        /// Application instance handle.
        app_id: String,
        /// Log text.
        log: String,
        /// Whether the runner flagged the text as an error.
        error: bool,
    },
    /// Any other well-formed event.
    Other {
        /// Event name, e.g. `app.webLaunchUrl`.
        name: String,
        /// Raw event parameters.
        params: Value,
    },
    /// A line that is not protocol traffic.
    UnhandledOutput {
        /// Raw line without the trailing newline.
        line: String,
        /// Stream the line arrived on.
        stream: OutputStream,
    },
    /// The runner process exited; all pending commands have failed.
    Exited {
        /// Exit code, when the process exited normally.
        code: Option<i32>,
    },
}

/// Subscription key for [`DaemonEvent`] categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`DaemonEvent::DaemonConnected`].
    DaemonConnected,
    /// [`DaemonEvent::LogMessage`].
    LogMessage,
    /// [`DaemonEvent::AppStart`].
    AppStart,
    /// [`DaemonEvent::AppDebugPort`].
    AppDebugPort,
    /// [`DaemonEvent::AppStarted`].
    AppStarted,
    /// [`DaemonEvent::AppStop`].
    AppStop,
    /// [`DaemonEvent::AppProgress`].
    AppProgress,
    /// [`DaemonEvent::AppLog`].
    AppLog,
    /// [`DaemonEvent::Other`].
    Other,
    /// [`DaemonEvent::UnhandledOutput`], the catch-all subscriber.
    UnhandledOutput,
    /// [`DaemonEvent::Exited`].
    Exited,
}

impl EventKind {
    /// Every kind, in a stable order.
    pub const ALL: [EventKind; 11] = [
        EventKind::DaemonConnected,
        EventKind::LogMessage,
        EventKind::AppStart,
        EventKind::AppDebugPort,
        EventKind::AppStarted,
        EventKind::AppStop,
        EventKind::AppProgress,
        EventKind::AppLog,
        EventKind::Other,
        EventKind::UnhandledOutput,
        EventKind::Exited,
    ];
}

impl DaemonEvent {
    /// Subscription category of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DaemonConnected { .. } => EventKind::DaemonConnected,
            Self::LogMessage { .. } => EventKind::LogMessage,
            Self::AppStart { .. } => EventKind::AppStart,
            Self::AppDebugPort { .. } => EventKind::AppDebugPort,
            Self::AppStarted { .. } => EventKind::AppStarted,
            Self::AppStop { .. } => EventKind::AppStop,
            Self::AppProgress { .. } => EventKind::AppProgress,
            Self::AppLog { .. } => EventKind::AppLog,
            Self::Other { .. } => EventKind::Other,
            Self::UnhandledOutput { .. } => EventKind::UnhandledOutput,
            Self::Exited { .. } => EventKind::Exited,
        }
    }
}
