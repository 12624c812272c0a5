//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Bridge error enumeration covering all session failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or launch-argument validation failure.
    Config(String),
    /// The runner process could not be created. Fatal to the session.
    Spawn(String),
    /// A correlated runner command received no response within its deadline.
    RequestTimeout {
        /// Runner method that timed out.
        method: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The runner transport is gone; outstanding and future commands fail.
    ProcessExited(String),
    /// A runtime extension call failed or no application instance existed.
    ExtensionCall(String),
    /// A reload or restart is already in flight for this session.
    ReloadInProgress,
    /// The runner answered a command with an error payload.
    Command(String),
    /// Runtime introspection transport or JSON-RPC failure.
    Runtime(String),
    /// Malformed debug-protocol traffic.
    Protocol(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::RequestTimeout { method, timeout } => {
                write!(f, "request timeout: {method} did not complete within {timeout:?}")
            }
            Self::ProcessExited(msg) => write!(f, "process exited: {msg}"),
            Self::ExtensionCall(msg) => write!(f, "extension call: {msg}"),
            Self::ReloadInProgress => write!(f, "reload already in progress"),
            Self::Command(msg) => write!(f, "command: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}
