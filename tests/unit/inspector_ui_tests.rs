//! Unit tests for inspection UI URL composition.

use flutter_debug_bridge::inspector_ui::{for_active_session, with_service_port};
use flutter_debug_bridge::session::registry::{RegisteredSession, SessionRegistry};
use flutter_debug_bridge::session::state::SessionKind;

const URI: &str = "ws://127.0.0.1:8181/abc=/ws";

#[test]
fn adds_query_when_none_present() {
    assert_eq!(
        with_service_port("http://127.0.0.1:9100", URI).as_deref(),
        Some("http://127.0.0.1:9100?port=8181")
    );
}

#[test]
fn appends_to_existing_query() {
    assert_eq!(
        with_service_port("http://h:1/?theme=dark", URI).as_deref(),
        Some("http://h:1/?theme=dark&port=8181")
    );
    assert_eq!(
        with_service_port("http://h:1/?", URI).as_deref(),
        Some("http://h:1/?port=8181")
    );
}

#[test]
fn keeps_fragment_last() {
    assert_eq!(
        with_service_port("http://h:1/#/inspector", URI).as_deref(),
        Some("http://h:1/?port=8181#/inspector")
    );
}

#[test]
fn portless_service_uri_yields_none() {
    assert_eq!(with_service_port("http://h:1/", "ws://host/ws"), None);
}

#[test]
fn active_session_without_endpoint_yields_none() {
    let registry = SessionRegistry::new();
    assert_eq!(for_active_session(&registry, "http://h:1/"), None);

    registry.register(RegisteredSession::new("s", None, SessionKind::Launch));
    assert_eq!(for_active_session(&registry, "http://h:1/"), None);

    registry.update_service_uri("s", URI);
    assert_eq!(
        for_active_session(&registry, "http://h:1/").as_deref(),
        Some("http://h:1/?port=8181")
    );
}
