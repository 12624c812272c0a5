//! Unit tests for the runner event bus.

use std::sync::{Arc, Mutex};

use flutter_debug_bridge::daemon::bus::EventBus;
use flutter_debug_bridge::daemon::events::{DaemonEvent, EventKind};

fn started(app_id: &str) -> DaemonEvent {
    DaemonEvent::AppStarted {
        app_id: app_id.into(),
    }
}

#[test]
fn handlers_receive_only_their_kind() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.register_handler(EventKind::AppStarted, move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    assert_eq!(bus.publish(&started("a")), 1);
    assert_eq!(bus.publish(&DaemonEvent::Exited { code: Some(0) }), 0);

    assert_eq!(*seen.lock().unwrap(), [started("a")]);
}

#[test]
fn handlers_run_in_registration_order() {
    let bus = EventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        bus.register_handler(EventKind::AppStarted, move |_| {
            order.lock().unwrap().push(label);
        });
    }

    bus.publish(&started("a"));
    assert_eq!(*order.lock().unwrap(), ["first", "second", "third"]);
}

#[test]
fn clones_share_subscriptions() {
    let bus = EventBus::new();
    let clone = bus.clone();
    clone.register_handler(EventKind::Exited, |_| {});

    assert_eq!(bus.subscription_count(), 1);
    assert_eq!(bus.publish(&DaemonEvent::Exited { code: None }), 1);
}

#[test]
fn every_event_maps_to_its_kind() {
    assert_eq!(started("a").kind(), EventKind::AppStarted);
    assert_eq!(
        DaemonEvent::AppStop {
            app_id: "a".into(),
            error: None
        }
        .kind(),
        EventKind::AppStop
    );
    assert_eq!(DaemonEvent::Exited { code: None }.kind(), EventKind::Exited);
}
