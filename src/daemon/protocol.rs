//! Runner wire protocol: line decoding and command encoding.
//!
//! The runner writes protocol traffic as single lines wrapped in a JSON
//! array with exactly one object:
//!
//! | Shape                                   | Decoded as                    |
//! |-----------------------------------------|-------------------------------|
//! | `[{"event":"app.start","params":{..}}]` | [`DaemonMessage::Event`]      |
//! | `[{"id":3,"result":..}]`                | [`DaemonMessage::Response`]   |
//! | `[{"id":3,"error":..}]`                 | [`DaemonMessage::Response`]   |
//! | *(anything else)*                       | [`DaemonMessage::Unhandled`]  |
//!
//! Anything that fails to decode is handed back verbatim as unhandled
//! output. The runner interleaves human-readable diagnostics (exception
//! banners, build output) with protocol lines on the same stream, so
//! dropping undecodable lines would lose user-visible text.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::daemon::events::{DaemonEvent, OutputStream};

/// One decoded runner line.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonMessage {
    /// A daemon event.
    Event(DaemonEvent),
    /// A response correlated to a previously sent command.
    Response {
        /// Correlation id of the originating command.
        id: u64,
        /// Result payload or the runner's error text.
        outcome: std::result::Result<Value, String>,
    },
    /// Free-form diagnostic text.
    Unhandled(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedParams {
    version: Option<String>,
    pid: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogMessageParams {
    level: String,
    message: String,
    stack_trace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppStartParams {
    app_id: String,
    device_id: Option<String>,
    directory: Option<String>,
    #[serde(default)]
    supports_restart: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugPortParams {
    app_id: String,
    ws_uri: String,
    base_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppIdParams {
    app_id: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressParams {
    app_id: String,
    progress_id: Option<String>,
    message: Option<String>,
    #[serde(default)]
    finished: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppLogParams {
    app_id: String,
    log: String,
    #[serde(default)]
    error: bool,
}

/// Decode one stdout line from the runner.
///
/// Never fails: lines that are not well-formed protocol messages come back
/// as [`DaemonMessage::Unhandled`] carrying the original text.
#[must_use]
pub fn parse_line(line: &str) -> DaemonMessage {
    let trimmed = line.trim();
    if !(trimmed.starts_with("[{") && trimmed.ends_with("}]")) {
        return DaemonMessage::Unhandled(line.to_owned());
    }

    let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(trimmed) else {
        return DaemonMessage::Unhandled(line.to_owned());
    };
    if items.len() != 1 {
        return DaemonMessage::Unhandled(line.to_owned());
    }
    let object = items.remove(0);

    if let Some(name) = object.get("event").and_then(Value::as_str) {
        let params = object.get("params").cloned().unwrap_or(Value::Null);
        return match decode_event(name, params) {
            Some(event) => DaemonMessage::Event(event),
            None => DaemonMessage::Unhandled(line.to_owned()),
        };
    }

    if let Some(id) = object.get("id").and_then(Value::as_u64) {
        if let Some(error) = object.get("error") {
            return DaemonMessage::Response {
                id,
                outcome: Err(error_text(error)),
            };
        }
        if object.get("method").is_none() {
            let result = object.get("result").cloned().unwrap_or(Value::Null);
            return DaemonMessage::Response {
                id,
                outcome: Ok(result),
            };
        }
    }

    DaemonMessage::Unhandled(line.to_owned())
}

/// Wrap a free-form stderr line; stderr never carries protocol traffic.
#[must_use]
pub fn stderr_line(line: String) -> DaemonEvent {
    DaemonEvent::UnhandledOutput {
        line,
        stream: OutputStream::Stderr,
    }
}

/// Serialize a runner command as a single protocol line (no newline).
#[must_use]
pub fn encode_command(id: u64, method: &str, params: &Value) -> String {
    json!([{ "id": id, "method": method, "params": params }]).to_string()
}

fn decode_event(name: &str, params: Value) -> Option<DaemonEvent> {
    let event = match name {
        "daemon.connected" => {
            let p: ConnectedParams = serde_json::from_value(params).ok()?;
            DaemonEvent::DaemonConnected {
                version: p.version,
                pid: p.pid,
            }
        }
        "daemon.logMessage" => {
            let p: LogMessageParams = serde_json::from_value(params).ok()?;
            DaemonEvent::LogMessage {
                level: p.level,
                message: p.message,
                stack_trace: p.stack_trace,
            }
        }
        "app.start" => {
            let p: AppStartParams = serde_json::from_value(params).ok()?;
            DaemonEvent::AppStart {
                app_id: p.app_id,
                device_id: p.device_id,
                directory: p.directory,
                supports_restart: p.supports_restart,
            }
        }
        "app.debugPort" => {
            let p: DebugPortParams = serde_json::from_value(params).ok()?;
            DaemonEvent::AppDebugPort {
                app_id: p.app_id,
                ws_uri: p.ws_uri,
                base_uri: p.base_uri,
            }
        }
        "app.started" => {
            let p: AppIdParams = serde_json::from_value(params).ok()?;
            DaemonEvent::AppStarted { app_id: p.app_id }
        }
        "app.stop" => {
            let p: AppIdParams = serde_json::from_value(params).ok()?;
            DaemonEvent::AppStop {
                app_id: p.app_id,
                error: p.error,
            }
        }
        "app.progress" => {
            let p: ProgressParams = serde_json::from_value(params).ok()?;
            DaemonEvent::AppProgress {
                app_id: p.app_id,
                progress_id: p.progress_id,
                message: p.message,
                finished: p.finished,
            }
        }
        "app.log" => {
            let p: AppLogParams = serde_json::from_value(params).ok()?;
            DaemonEvent::AppLog {
                app_id: p.app_id,
                log: p.log,
                error: p.error,
            }
        }
        other => {
            debug!(event = other, "runner event without a typed mapping");
            DaemonEvent::Other {
                name: other.to_owned(),
                params,
            }
        }
    };
    Some(event)
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), ToOwned::to_owned),
        other => other.to_string(),
    }
}
