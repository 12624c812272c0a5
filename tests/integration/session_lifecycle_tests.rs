//! Launch, attach, output and exit handling of a debug session.

use std::sync::Arc;

use flutter_debug_bridge::dap::messages::Request;
use flutter_debug_bridge::runtime::RuntimeEvent;
use flutter_debug_bridge::session::registry::RegisteredSession;
use flutter_debug_bridge::session::state::{SessionKind, SessionPhase};
use serde_json::json;

use super::test_helpers::{
    debug_launch, fast_config, harness, harness_with, no_debug_launch, wait_until, FakeConnector,
    FakeSpawner, SERVICE_URI,
};

fn contains_sequence(haystack: &[String], needle: &[&str]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.iter().zip(needle).all(|(a, b)| a == b))
}

#[tokio::test]
async fn debug_launch_passes_entry_device_and_start_paused() {
    let mut h = harness();
    let _runner = h.launch(debug_launch()).await;

    let commands = h.spawner.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].executable, "flutter");
    let args = &commands[0].args;
    assert_eq!(&args[..2], ["run", "--machine"]);
    assert!(
        contains_sequence(args, &["-t", "lib/main.dart", "-d", "X", "--start-paused"]),
        "unexpected args: {args:?}"
    );
}

#[tokio::test]
async fn launch_emits_launching_notification_before_app_is_ready() {
    let mut h = harness();
    let _runner = h.launch(debug_launch()).await;

    let body = h.client.wait_event("flutter.launching").await;
    assert!(body["message"].as_str().unwrap().contains("lib/main.dart"));
    assert_eq!(h.session.phase().await, SessionPhase::WaitingForAppStart);
}

#[tokio::test]
async fn attach_derives_debug_port_from_service_uri() {
    let mut h = harness();
    let (success, _) = h
        .request(
            1,
            "attach",
            json!({ "deviceId": "X", "serviceUri": "ws://host:1234/abc" }),
        )
        .await;
    assert!(success);

    let args = &h.spawner.commands()[0].args;
    assert_eq!(&args[..2], ["attach", "--machine"]);
    assert!(contains_sequence(args, &["--debug-port", "1234"]));
}

#[tokio::test]
async fn configured_runner_and_environment_are_used() {
    let mut config = fast_config();
    config.runner = "/opt/flutter/bin/flutter".into();
    config.force_verbose = true;
    config.env.insert("PUB_CACHE".into(), "/cache".into());
    config.env.insert("MODE".into(), "config".into());
    let mut h = harness_with(config, FakeSpawner::default(), FakeConnector::new());

    let mut args = debug_launch();
    args["env"] = json!({ "MODE": "launch" });
    args["args"] = json!(["--flavor", "dev"]);
    let _runner = h.launch(args).await;

    let command = &h.spawner.commands()[0];
    assert_eq!(command.executable, "/opt/flutter/bin/flutter");
    assert_eq!(command.env.get("PUB_CACHE").map(String::as_str), Some("/cache"));
    assert_eq!(command.env.get("MODE").map(String::as_str), Some("launch"));
    assert!(contains_sequence(&command.args, &["--flavor", "dev", "-v"]));
    assert_eq!(command.cwd.as_deref(), Some(std::path::Path::new("/app")));
}

#[tokio::test]
async fn launch_without_program_is_rejected() {
    let mut h = harness();
    let (success, message) = h.request(1, "launch", json!({ "deviceId": "X" })).await;

    assert!(!success);
    assert!(message.unwrap().contains("program"));
    assert!(h.spawner.commands().is_empty());
}

#[tokio::test]
async fn spawn_failure_tears_session_down() {
    let mut h = harness_with(fast_config(), FakeSpawner::failing(), FakeConnector::new());

    let (success, message) = h.request(1, "launch", debug_launch()).await;

    assert!(!success);
    assert!(message.unwrap().starts_with("spawn:"));
    let body = h.client.drain();
    assert!(body.iter().any(|m| m.event_name() == Some("terminated")));
    assert!(h.registry.is_empty());
    assert_eq!(h.session.phase().await, SessionPhase::Terminated);
}

#[tokio::test]
async fn launch_purges_stale_registry_entries() {
    let mut h = harness();
    h.registry
        .register(RegisteredSession::new("stale-1", None, SessionKind::Launch));
    h.registry
        .register(RegisteredSession::new("stale-2", None, SessionKind::Attach));

    let _runner = h.launch(debug_launch()).await;

    assert_eq!(h.registry.len(), 1);
    assert!(h.registry.contains(h.session.id()));
    assert!(!h.registry.contains("stale-1"));
}

#[tokio::test]
async fn debug_port_is_published_to_registry() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;

    assert_eq!(h.registry.active_service_uri().as_deref(), Some(SERVICE_URI));
}

#[tokio::test]
async fn exception_banner_is_error_output_through_closing_rule() {
    let mut h = harness();
    let mut runner = h.launch(no_debug_launch()).await;

    let lines = [
        "plain before",
        "══╡ EXCEPTION CAUGHT BY WIDGETS LIBRARY ╞═══════════════════",
        "The following assertion was thrown building Foo:",
        "═══════════════════════════════════════════════════════════",
        "plain after",
    ];
    for line in lines {
        runner.line(line).await;
    }

    let mut categories = Vec::new();
    while categories.len() < lines.len() {
        let body = h.client.wait_event("output").await;
        let text = body["output"].as_str().unwrap().trim_end().to_owned();
        if lines.contains(&text.as_str()) {
            categories.push(body["category"].as_str().unwrap().to_owned());
        }
    }
    assert_eq!(
        categories,
        ["stdout", "stderr", "stderr", "stderr", "stdout"]
    );
}

#[tokio::test]
async fn app_log_errors_are_error_output() {
    let mut h = harness();
    let mut runner = h.launch(no_debug_launch()).await;

    runner
        .event(
            "app.log",
            json!({ "appId": "app-1", "log": "bad things", "error": true }),
        )
        .await;

    assert_eq!(h.client.wait_output_containing("bad things").await, "stderr");
}

#[tokio::test]
async fn progress_events_are_forwarded() {
    let mut h = harness();
    let mut runner = h.launch(no_debug_launch()).await;

    runner
        .event(
            "app.progress",
            json!({
                "appId": "app-1",
                "id": "1",
                "progressId": "hot.reload",
                "message": "Performing hot reload...",
                "finished": false
            }),
        )
        .await;

    let body = h.client.wait_event("flutter.progress").await;
    assert_eq!(body["progressId"], "hot.reload");
    assert_eq!(body["finished"], false);
}

#[tokio::test]
async fn runner_exit_tears_down_and_unregisters() {
    let mut h = harness();
    let runner = h.launch(no_debug_launch()).await;
    assert_eq!(h.registry.len(), 1);

    drop(runner);

    let exited = h.client.wait_event("exited").await;
    assert_eq!(exited["exitCode"], 0);
    h.client.wait_event("terminated").await;
    assert!(h.registry.is_empty());
    assert!(h.session.is_torn_down());
}

#[tokio::test]
async fn app_stop_invalidates_handle_and_ends_session() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;
    assert_eq!(h.session.app_id().await.as_deref(), Some("app-1"));

    runner.event("app.stop", json!({ "appId": "app-1" })).await;

    h.client.wait_event("terminated").await;
    assert_eq!(h.session.app_id().await, None);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn daemon_traffic_is_mirrored_when_enabled() {
    let mut config = fast_config();
    config.log_daemon_traffic = true;
    let mut h = harness_with(config, FakeSpawner::default(), FakeConnector::new());
    let mut runner = h.launch(no_debug_launch()).await;

    runner.line("hello from runner").await;

    loop {
        let body = h.client.wait_event("flutter.log").await;
        if body["message"] == "hello from runner" {
            assert_eq!(body["direction"], "in");
            break;
        }
    }
}

#[tokio::test]
async fn paused_isolates_are_resumed() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;

    h.connector.send_event(RuntimeEvent::PausedAtStart {
        isolate_id: "isolates/1".into(),
    });

    let runtime = Arc::clone(&h.connector.runtime);
    wait_until(|| runtime.resumed() == ["isolates/1"]).await;
}

#[tokio::test]
async fn threads_and_stack_come_from_runtime() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;

    h.session
        .handle_request(Request::new(5, "threads", json!({})))
        .await;
    let threads = h.client.wait_response_body("threads").await;
    assert_eq!(threads["threads"][0]["id"], 1);
    assert_eq!(threads["threads"][0]["name"], "main");

    h.session
        .handle_request(Request::new(6, "stackTrace", json!({ "threadId": 1 })))
        .await;
    let stack = h.client.wait_response_body("stackTrace").await;
    assert_eq!(stack["totalFrames"], 2);
    assert_eq!(stack["stackFrames"][0]["name"], "main");
    assert_eq!(stack["stackFrames"][0]["source"]["path"], "/app/lib/main.dart");
}

#[tokio::test]
async fn unknown_requests_are_rejected() {
    let mut h = harness();
    let (success, message) = h.request(1, "evaluate", json!({})).await;

    assert!(!success);
    assert!(message.unwrap().contains("unsupported request"));
}

#[tokio::test]
async fn memory_usage_is_polled_when_requested() {
    let mut h = harness();
    let mut arguments = debug_launch();
    arguments["pollMemoryUsage"] = json!(true);
    let _runner = h.launch_running(arguments).await;

    let usage = h.client.wait_event("flutter.memoryUsage").await;
    assert_eq!(usage["heapUsage"], 1024);
}

#[tokio::test]
async fn runtime_extension_events_become_notifications() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;

    h.connector.send_event(RuntimeEvent::FirstFrame);
    h.client.wait_event("flutter.firstFrame").await;

    let payload = json!({ "extension": "ext.flutter.debugPaint", "value": "true" });
    h.connector
        .send_event(RuntimeEvent::ServiceExtensionStateChanged(payload.clone()));
    assert_eq!(
        h.client.wait_event("flutter.serviceExtensionStateChanged").await,
        payload
    );

    h.connector.send_event(RuntimeEvent::Frame);
    let refresh = h.client.wait_event("flutter.refresh").await;
    assert_eq!(refresh["reasons"], json!(["frame"]));
}

#[cfg(unix)]
#[tokio::test]
async fn auxiliary_processes_are_killed_on_teardown() {
    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("sleep spawns");

    let mut h = harness();
    let mut runner = h.launch(no_debug_launch()).await;
    runner
        .event("daemon.connected", json!({ "version": "0.6.1", "pid": child.id() }))
        .await;
    runner.line("connected marker").await;
    h.client.wait_output_containing("connected marker").await;

    let (success, _) = h.request(2, "terminate", json!({})).await;
    assert!(success);

    wait_until(|| matches!(child.try_wait(), Ok(Some(_)))).await;
}
