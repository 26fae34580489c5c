//! Unit tests for EventBus

use super::*;
use crate::event::events::{KeyInput, Key, SceneClosed, WindowResized};
use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// SUBSCRIBE / PUBLISH
// ============================================================================

#[test]
fn test_publish_without_subscribers() {
    let mut bus = EventBus::new();
    assert_eq!(bus.publish(&SceneClosed), 0);
}

#[test]
fn test_publish_delivers_payload() {
    let mut bus = EventBus::new();
    let id = bus.register_subscriber();
    let received = Rc::new(RefCell::new(Vec::new()));

    let sink = received.clone();
    bus.subscribe(id, Priority::Normal, move |e: &WindowResized| {
        sink.borrow_mut().push((e.width, e.height));
    });

    assert_eq!(bus.publish(&WindowResized { width: 800, height: 600 }), 1);
    assert_eq!(bus.publish(&WindowResized { width: 0, height: 0 }), 1);
    assert_eq!(*received.borrow(), vec![(800, 600), (0, 0)]);
}

#[test]
fn test_events_are_routed_by_type() {
    let mut bus = EventBus::new();
    let id = bus.register_subscriber();
    let hits = Rc::new(RefCell::new(0));

    let sink = hits.clone();
    bus.subscribe(id, Priority::Normal, move |_: &SceneClosed| *sink.borrow_mut() += 1);

    bus.publish(&KeyInput { key: Key::F5, pressed: true });
    assert_eq!(*hits.borrow(), 0);
    bus.publish(&SceneClosed);
    assert_eq!(*hits.borrow(), 1);
}

#[test]
fn test_priority_order_is_high_normal_low() {
    let mut bus = EventBus::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for (name, priority) in [("low", Priority::Low), ("high", Priority::High), ("normal", Priority::Normal)] {
        let id = bus.register_subscriber();
        let sink = order.clone();
        bus.subscribe(id, priority, move |_: &SceneClosed| sink.borrow_mut().push(name));
    }

    bus.publish(&SceneClosed);
    assert_eq!(*order.borrow(), vec!["high", "normal", "low"]);
}

#[test]
fn test_same_priority_keeps_subscription_order() {
    let mut bus = EventBus::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for n in 0..4 {
        let id = bus.register_subscriber();
        let sink = order.clone();
        bus.subscribe(id, Priority::High, move |_: &SceneClosed| sink.borrow_mut().push(n));
    }

    bus.publish(&SceneClosed);
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
}

// ============================================================================
// UNSUBSCRIBE
// ============================================================================

#[test]
fn test_unsubscribe_single_event_type() {
    let mut bus = EventBus::new();
    let id = bus.register_subscriber();
    bus.subscribe(id, Priority::Normal, |_: &SceneClosed| {});
    bus.subscribe(id, Priority::Normal, |_: &WindowResized| {});

    bus.unsubscribe::<SceneClosed>(id);

    assert!(!bus.has_subscribers::<SceneClosed>());
    assert!(bus.has_subscribers::<WindowResized>());
    assert_eq!(bus.subscription_count(id), 1);
}

#[test]
fn test_unsubscribe_all_removes_every_registration() {
    let mut bus = EventBus::new();
    let a = bus.register_subscriber();
    let b = bus.register_subscriber();

    bus.subscribe(a, Priority::High, |_: &SceneClosed| {});
    bus.subscribe(a, Priority::Low, |_: &SceneClosed| {});
    bus.subscribe(a, Priority::Normal, |_: &WindowResized| {});
    bus.subscribe(b, Priority::Normal, |_: &WindowResized| {});
    assert_eq!(bus.subscription_count(a), 3);

    bus.unsubscribe_all(a);

    assert_eq!(bus.subscription_count(a), 0);
    assert_eq!(bus.subscription_count(b), 1);
    assert!(!bus.has_subscribers::<SceneClosed>());
    assert_eq!(bus.publish(&WindowResized { width: 1, height: 1 }), 1);
}

#[test]
fn test_subscriber_ids_are_unique() {
    let mut bus = EventBus::new();
    let a = bus.register_subscriber();
    let b = bus.register_subscriber();
    assert_ne!(a, b);
}
