//! Hot reload / hot restart mutual exclusion and failure reporting.

use std::time::Duration;

use flutter_debug_bridge::config::RestartBehaviour;
use flutter_debug_bridge::dap::messages::Request;
use serde_json::json;

use super::test_helpers::{
    fast_config, harness, harness_with, no_debug_launch, FakeConnector, FakeSpawner,
};

#[tokio::test]
async fn hot_reload_sends_restart_and_schedules_refresh() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;

    let session = std::sync::Arc::clone(&h.session);
    let pending = tokio::spawn(async move {
        session
            .handle_request(Request::new(2, "hotReload", json!({ "reason": "save" })))
            .await;
    });

    let command = runner.next_command().await;
    assert_eq!(command["method"], "app.restart");
    assert_eq!(
        command["params"],
        json!({ "appId": "app-1", "fullRestart": false, "pause": false, "reason": "save" })
    );
    runner
        .respond(&command["id"], json!({ "code": 0, "message": "" }))
        .await;
    pending.await.unwrap();

    let (success, _) = h.client.wait_response("hotReload").await;
    assert!(success);
    let refresh = h.client.wait_event("flutter.refresh").await;
    assert_eq!(refresh["reasons"], json!(["hot-reload"]));
    assert!(!h.session.is_reloading());
}

#[tokio::test]
async fn concurrent_reload_is_rejected_locally() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;

    let session = std::sync::Arc::clone(&h.session);
    let first = tokio::spawn(async move {
        session
            .handle_request(Request::new(2, "hotReload", json!({})))
            .await;
    });
    let in_flight = runner.next_command().await;
    assert!(h.session.is_reloading());

    h.session
        .handle_request(Request::new(3, "hotReload", json!({})))
        .await;
    let category = h.client.wait_output_containing("already in progress").await;
    assert_eq!(category, "stderr");

    assert!(
        runner
            .try_next_command(Duration::from_millis(100))
            .await
            .is_none(),
        "second reload must not reach the runner"
    );

    runner.respond(&in_flight["id"], json!({ "code": 0 })).await;
    first.await.unwrap();
    assert!(!h.session.is_reloading());

    let session = std::sync::Arc::clone(&h.session);
    let restart = tokio::spawn(async move {
        session
            .handle_request(Request::new(4, "hotRestart", json!({})))
            .await;
    });
    let next = runner.next_command().await;
    assert_eq!(next["params"]["fullRestart"], true);
    runner.respond(&next["id"], json!({ "code": 0 })).await;
    restart.await.unwrap();
}

#[tokio::test]
async fn failed_reload_is_reported_and_releases_flag() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;

    let session = std::sync::Arc::clone(&h.session);
    let pending = tokio::spawn(async move {
        session
            .handle_request(Request::new(2, "hotReload", json!({})))
            .await;
    });
    let command = runner.next_command().await;
    runner
        .respond_error(&command["id"], "compilation failed")
        .await;
    pending.await.unwrap();

    let (success, _) = h.client.wait_response("hotReload").await;
    assert!(success, "custom requests are acknowledged even on failure");
    let category = h.client.wait_output_containing("compilation failed").await;
    assert_eq!(category, "stderr");
    assert!(!h.session.is_reloading());
}

#[tokio::test]
async fn non_zero_result_code_counts_as_failure() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;

    let session = std::sync::Arc::clone(&h.session);
    let pending = tokio::spawn(async move { session.reload(false, "manual").await });
    let command = runner.next_command().await;
    runner
        .respond(
            &command["id"],
            json!({ "code": 1, "message": "Reload rejected" }),
        )
        .await;

    assert!(pending.await.unwrap().is_err());
    h.client.wait_output_containing("Reload rejected").await;
    assert!(!h.session.is_reloading());
}

#[tokio::test]
async fn reload_without_app_is_a_silent_no_op() {
    let mut h = harness();
    let mut runner = h.launch(no_debug_launch()).await;

    let (success, _) = h.request(2, "hotReload", json!({})).await;

    assert!(success);
    assert!(runner
        .try_next_command(Duration::from_millis(100))
        .await
        .is_none());
    assert!(h
        .client
        .drain()
        .iter()
        .all(|m| m.event_name() != Some("output")));
}

#[tokio::test]
async fn restart_request_follows_configured_behaviour() {
    let mut config = fast_config();
    config.restart_behaviour = RestartBehaviour::HotRestart;
    let mut h = harness_with(config, FakeSpawner::default(), FakeConnector::new());
    let mut runner = h.launch_running(no_debug_launch()).await;

    let session = std::sync::Arc::clone(&h.session);
    let pending = tokio::spawn(async move {
        session
            .handle_request(Request::new(2, "restart", json!({})))
            .await;
    });

    h.client.wait_event("flutter.hotRestartRequest").await;
    let command = runner.next_command().await;
    assert_eq!(command["params"]["fullRestart"], true);
    runner.respond(&command["id"], json!({ "code": 0 })).await;
    pending.await.unwrap();

    let (success, _) = h.client.wait_response("restart").await;
    assert!(success);
    let refresh = h.client.wait_event("flutter.refresh").await;
    assert_eq!(refresh["reasons"], json!(["hot-restart"]));
}

#[tokio::test]
async fn plain_restart_defaults_to_hot_reload() {
    let mut h = harness();
    let mut runner = h.launch_running(no_debug_launch()).await;

    let session = std::sync::Arc::clone(&h.session);
    let pending = tokio::spawn(async move { session.restart().await });

    h.client.wait_event("flutter.hotReloadRequest").await;
    let command = runner.next_command().await;
    assert_eq!(command["params"]["fullRestart"], false);
    assert_eq!(command["params"]["reason"], "restart");
    runner.respond(&command["id"], json!({ "code": 0 })).await;
    pending.await.unwrap();
}
