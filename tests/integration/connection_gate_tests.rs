//! The runtime service is connected exactly once, after both the endpoint
//! and the ready event are known.

use std::sync::Arc;

use flutter_debug_bridge::session::state::SessionPhase;
use serde_json::json;

use super::test_helpers::{
    debug_launch, fast_config, harness, harness_with, no_debug_launch, wait_until, FakeConnector,
    FakeSpawner, SERVICE_URI,
};

#[tokio::test]
async fn endpoint_then_ready_connects_once() {
    let mut h = harness();
    let mut runner = h.launch(debug_launch()).await;

    runner
        .event("app.start", json!({ "appId": "app-1" }))
        .await;
    runner
        .event(
            "app.debugPort",
            json!({ "appId": "app-1", "wsUri": SERVICE_URI }),
        )
        .await;
    runner
        .event("app.started", json!({ "appId": "app-1" }))
        .await;
    h.client.wait_event("flutter.launched").await;
    assert_eq!(h.connector.connect_count(), 1);

    runner
        .event("app.started", json!({ "appId": "app-1" }))
        .await;
    h.client.wait_event("flutter.launched").await;

    assert_eq!(h.connector.uris(), [SERVICE_URI]);
    assert_eq!(h.session.phase().await, SessionPhase::Running);
}

#[tokio::test]
async fn ready_then_endpoint_connects_once() {
    let mut h = harness();
    let mut runner = h.launch(debug_launch()).await;

    runner
        .event("app.start", json!({ "appId": "app-1" }))
        .await;
    runner
        .event("app.started", json!({ "appId": "app-1" }))
        .await;
    h.client.wait_event("flutter.launched").await;
    assert_eq!(h.connector.connect_count(), 0);

    runner
        .event(
            "app.debugPort",
            json!({ "appId": "app-1", "wsUri": SERVICE_URI }),
        )
        .await;
    let connector = Arc::clone(&h.connector);
    wait_until(|| connector.connect_count() == 1).await;

    runner
        .event(
            "app.debugPort",
            json!({ "appId": "app-1", "wsUri": SERVICE_URI }),
        )
        .await;
    runner
        .event("app.started", json!({ "appId": "app-1" }))
        .await;
    h.client.wait_event("flutter.launched").await;

    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn no_debug_session_never_connects() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;

    runner
        .event("app.started", json!({ "appId": "app-1" }))
        .await;
    h.client.wait_event("flutter.launched").await;

    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(h.session.phase().await, SessionPhase::Running);
}

#[tokio::test]
async fn connection_failure_is_reported_once_and_not_retried() {
    let mut h = harness_with(fast_config(), FakeSpawner::default(), FakeConnector::failing());
    let mut runner = h.launch_running(debug_launch()).await;

    let category = h
        .client
        .wait_output_containing("failed to connect to runtime service")
        .await;
    assert_eq!(category, "stderr");

    runner
        .event(
            "app.debugPort",
            json!({ "appId": "app-1", "wsUri": SERVICE_URI }),
        )
        .await;
    runner
        .event("app.started", json!({ "appId": "app-1" }))
        .await;
    h.client.wait_event("flutter.launched").await;

    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn runtime_is_closed_on_teardown() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;

    h.session.teardown().await;

    assert!(h.connector.runtime.is_closed());
    h.client.wait_event("terminated").await;
}

#[tokio::test]
async fn memory_usage_is_polled_when_requested() {
    let mut h = harness();
    let mut args = debug_launch();
    args["pollMemoryUsage"] = json!(true);
    let _runner = h.launch_running(args).await;

    let usage = h.client.wait_event("flutter.memoryUsage").await;
    assert_eq!(usage["heapUsage"], 1024);
}

#[tokio::test]
async fn unresponsive_runtime_service_does_not_stall_the_session() {
    let mut h = harness_with(fast_config(), FakeSpawner::default(), FakeConnector::hanging());
    let mut runner = h.launch(debug_launch()).await;

    runner.start_app("app-1").await;

    h.client.wait_event("flutter.launched").await;
    let category = h
        .client
        .wait_output_containing("failed to connect to runtime service")
        .await;
    assert_eq!(category, "stderr");
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(h.session.phase().await, SessionPhase::Running);

    runner.line("output after the failed connect").await;
    h.client
        .wait_output_containing("output after the failed connect")
        .await;
}
