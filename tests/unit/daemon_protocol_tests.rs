//! Unit tests for runner line decoding and command encoding.

use flutter_debug_bridge::daemon::events::{DaemonEvent, EventKind, OutputStream};
use flutter_debug_bridge::daemon::protocol::{encode_command, parse_line, stderr_line, DaemonMessage};
use serde_json::{json, Value};

#[test]
fn app_start_event_is_typed() {
    let line = r#"[{"event":"app.start","params":{"appId":"a1","deviceId":"X","directory":"/app","supportsRestart":true}}]"#;
    assert_eq!(
        parse_line(line),
        DaemonMessage::Event(DaemonEvent::AppStart {
            app_id: "a1".into(),
            device_id: Some("X".into()),
            directory: Some("/app".into()),
            supports_restart: true,
        })
    );
}

#[test]
fn debug_port_event_carries_ws_uri() {
    let line = r#"[{"event":"app.debugPort","params":{"appId":"a1","port":4000,"wsUri":"ws://127.0.0.1:4000/x=/ws","baseUri":"file:///tmp/"}}]"#;
    let DaemonMessage::Event(DaemonEvent::AppDebugPort { ws_uri, base_uri, .. }) = parse_line(line)
    else {
        panic!("expected a debug port event");
    };
    assert_eq!(ws_uri, "ws://127.0.0.1:4000/x=/ws");
    assert_eq!(base_uri.as_deref(), Some("file:///tmp/"));
}

#[test]
fn success_response_is_correlated() {
    assert_eq!(
        parse_line(r#"[{"id":7,"result":{"code":0}}]"#),
        DaemonMessage::Response {
            id: 7,
            outcome: Ok(json!({ "code": 0 })),
        }
    );
}

#[test]
fn response_without_result_is_null() {
    assert_eq!(
        parse_line(r#"[{"id":2}]"#),
        DaemonMessage::Response {
            id: 2,
            outcome: Ok(Value::Null),
        }
    );
}

#[test]
fn error_response_carries_message() {
    assert_eq!(
        parse_line(r#"[{"id":3,"error":"app 'x' not found"}]"#),
        DaemonMessage::Response {
            id: 3,
            outcome: Err("app 'x' not found".into()),
        }
    );
}

#[test]
fn plain_text_is_unhandled_verbatim() {
    let line = "Running Gradle task 'assembleDebug'...   ";
    assert_eq!(parse_line(line), DaemonMessage::Unhandled(line.into()));
}

#[test]
fn malformed_json_is_unhandled() {
    let line = "[{not json}]";
    assert_eq!(parse_line(line), DaemonMessage::Unhandled(line.into()));
}

#[test]
fn multi_element_array_is_unhandled() {
    let line = r#"[{"id":1,"result":1},{"id":2,"result":2}]"#;
    assert_eq!(parse_line(line), DaemonMessage::Unhandled(line.into()));
}

#[test]
fn known_event_with_bad_params_is_unhandled() {
    let line = r#"[{"event":"app.start","params":{"deviceId":"X"}}]"#;
    assert_eq!(parse_line(line), DaemonMessage::Unhandled(line.into()));
}

#[test]
fn unknown_event_keeps_name_and_params() {
    let line = r#"[{"event":"app.webLaunchUrl","params":{"url":"http://localhost:1"}}]"#;
    let DaemonMessage::Event(event) = parse_line(line) else {
        panic!("expected an event");
    };
    assert_eq!(event.kind(), EventKind::Other);
    assert_eq!(
        event,
        DaemonEvent::Other {
            name: "app.webLaunchUrl".into(),
            params: json!({ "url": "http://localhost:1" }),
        }
    );
}

#[test]
fn connected_event_reports_pid() {
    let line = r#"[{"event":"daemon.connected","params":{"version":"0.6.1","pid":99}}]"#;
    assert_eq!(
        parse_line(line),
        DaemonMessage::Event(DaemonEvent::DaemonConnected {
            version: Some("0.6.1".into()),
            pid: Some(99),
        })
    );
}

#[test]
fn app_log_error_flag_defaults_to_false() {
    let line = r#"[{"event":"app.log","params":{"appId":"a","log":"hi"}}]"#;
    assert_eq!(
        parse_line(line),
        DaemonMessage::Event(DaemonEvent::AppLog {
            app_id: "a".into(),
            log: "hi".into(),
            error: false,
        })
    );
}

#[test]
fn stderr_lines_are_unhandled_stderr_output() {
    assert_eq!(
        stderr_line("boom".into()),
        DaemonEvent::UnhandledOutput {
            line: "boom".into(),
            stream: OutputStream::Stderr,
        }
    );
}

#[test]
fn commands_are_single_element_arrays() {
    let encoded = encode_command(5, "app.restart", &json!({ "appId": "a" }));
    assert!(!encoded.contains('\n'));
    let value: Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(
        value,
        json!([{ "id": 5, "method": "app.restart", "params": { "appId": "a" } }])
    );
}

#[test]
fn every_event_kind_is_listed_once() {
    let mut kinds = EventKind::ALL.to_vec();
    kinds.dedup();
    assert_eq!(kinds.len(), EventKind::ALL.len());
}
