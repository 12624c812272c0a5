//! Inspect events resolve the selected widget to a source location.

use std::sync::Arc;

use flutter_debug_bridge::runtime::extensions::{
    DISPOSE_GROUP, GET_SELECTED_SUMMARY_WIDGET, SET_PUB_ROOT_DIRECTORIES,
};
use flutter_debug_bridge::runtime::RuntimeEvent;
use serde_json::json;

use super::test_helpers::{debug_launch, harness, wait_until};

fn inspect_event() -> RuntimeEvent {
    RuntimeEvent::Inspect {
        isolate_id: "isolates/1".into(),
        inspectee: json!({ "type": "@Instance", "id": "objects/7" }),
    }
}

#[tokio::test]
async fn inspect_navigates_to_creation_location_and_disposes_group() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;
    h.connector.runtime.respond_with(
        GET_SELECTED_SUMMARY_WIDGET,
        json!({
            "result": {
                "description": "Text",
                "creationLocation": { "file": "file:///app/lib/main.dart", "line": 12, "column": 7 }
            }
        }),
    );

    h.connector.send_event(inspect_event());

    let navigate = h.client.wait_event("flutter.navigate").await;
    assert_eq!(
        navigate,
        json!({ "file": "file:///app/lib/main.dart", "line": 12, "column": 7 })
    );

    let runtime = Arc::clone(&h.connector.runtime);
    wait_until(|| runtime.calls().len() == 3).await;
    let calls = runtime.calls();
    assert_eq!(
        runtime.call_names(),
        [SET_PUB_ROOT_DIRECTORIES, GET_SELECTED_SUMMARY_WIDGET, DISPOSE_GROUP]
    );
    assert_eq!(calls[0].1, json!({ "arg0": "/app" }));
    let group = calls[1].1["objectGroup"].clone();
    assert!(group.is_string());
    assert_eq!(calls[2].1["objectGroup"], group);
}

#[tokio::test]
async fn each_inspect_uses_a_fresh_group() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;
    let runtime = Arc::clone(&h.connector.runtime);

    h.connector.send_event(inspect_event());
    wait_until(|| runtime.calls().len() == 3).await;
    h.connector.send_event(inspect_event());
    wait_until(|| runtime.calls().len() == 6).await;

    let calls = runtime.calls();
    assert_ne!(calls[1].1["objectGroup"], calls[4].1["objectGroup"]);
}

#[tokio::test]
async fn widget_without_location_is_not_navigated() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;
    h.connector
        .runtime
        .respond_with(GET_SELECTED_SUMMARY_WIDGET, json!({ "result": { "description": "Text" } }));

    h.connector.send_event(inspect_event());

    let runtime = Arc::clone(&h.connector.runtime);
    wait_until(|| runtime.call_names().last().map(String::as_str) == Some(DISPOSE_GROUP)).await;
    assert_eq!(h.client.count_events("flutter.navigate"), 0);
}

#[tokio::test]
async fn failed_summary_is_reported_and_group_still_disposed() {
    let mut h = harness();
    let _runner = h.launch_running(debug_launch()).await;
    h.connector.runtime.fail(GET_SELECTED_SUMMARY_WIDGET);

    h.connector.send_event(inspect_event());

    let category = h.client.wait_output_containing("inspect:").await;
    assert_eq!(category, "stderr");
    let runtime = Arc::clone(&h.connector.runtime);
    wait_until(|| runtime.call_names().last().map(String::as_str) == Some(DISPOSE_GROUP)).await;
}
