//! Debug-protocol message types and the outbound client channel.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// Inbound request from the debug-protocol client.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Request {
    /// Client sequence number.
    pub seq: i64,
    /// Message type; only `request` is handled.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command name, e.g. `launch` or `hotReload`.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub arguments: Value,
}

impl Request {
    /// Build a request in code (tests and internal dispatch).
    #[must_use]
    pub fn new(seq: i64, command: &str, arguments: Value) -> Self {
        Self {
            seq,
            kind: "request".into(),
            command: command.to_owned(),
            arguments,
        }
    }
}

/// Message queued for the client; the writer assigns the sequence number.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Response to a request.
    Response {
        /// Sequence number of the answered request.
        request_seq: i64,
        /// Command of the answered request.
        command: String,
        /// Whether the request succeeded.
        success: bool,
        /// Error text for failed requests.
        message: Option<String>,
        /// Response body.
        body: Value,
    },
    /// Event pushed to the client.
    Event {
        /// Event name, e.g. `output` or `flutter.launched`.
        event: String,
        /// Event body.
        body: Value,
    },
}

impl Outgoing {
    /// Serialize with the writer-assigned sequence number.
    #[must_use]
    pub fn to_json(&self, seq: i64) -> Value {
        match self {
            Self::Response {
                request_seq,
                command,
                success,
                message,
                body,
            } => {
                let mut value = json!({
                    "seq": seq,
                    "type": "response",
                    "request_seq": request_seq,
                    "command": command,
                    "success": success,
                    "body": body,
                });
                if let Some(message) = message {
                    value["message"] = Value::String(message.clone());
                }
                value
            }
            Self::Event { event, body } => json!({
                "seq": seq,
                "type": "event",
                "event": event,
                "body": body,
            }),
        }
    }

    /// Event name, when this is an event.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event { event, .. } => Some(event),
            Self::Response { .. } => None,
        }
    }
}

/// Severity channel of an `output` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    /// Normal program output.
    Stdout,
    /// Error-severity output.
    Stderr,
    /// Bridge diagnostics.
    Console,
}

impl OutputCategory {
    /// Wire name of the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Console => "console",
        }
    }
}

/// Cloneable sender of responses and events to the client.
///
/// Sends never fail from the caller's point of view: once the client is
/// gone, messages are dropped with a debug log.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ClientChannel {
    /// Create a channel and the receiver the protocol writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, message: Outgoing) {
        if self.tx.send(message).is_err() {
            debug!("client channel closed, dropping message");
        }
    }

    /// Push an event.
    pub fn event(&self, event: &str, body: Value) {
        self.send(Outgoing::Event {
            event: event.to_owned(),
            body,
        });
    }

    /// Push an `output` event.
    pub fn output(&self, category: OutputCategory, text: &str) {
        self.event(
            "output",
            json!({ "category": category.as_str(), "output": text }),
        );
    }

    /// Acknowledge `request` successfully.
    pub fn respond_ok(&self, request: &Request, body: Value) {
        self.send(Outgoing::Response {
            request_seq: request.seq,
            command: request.command.clone(),
            success: true,
            message: None,
            body,
        });
    }

    /// Fail `request` with `message`.
    pub fn respond_err(&self, request: &Request, message: String) {
        self.send(Outgoing::Response {
            request_seq: request.seq,
            command: request.command.clone(),
            success: false,
            message: Some(message),
            body: Value::Null,
        });
    }
}
