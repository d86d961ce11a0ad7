use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::test_helpers::{ScriptedHistory, complete_handshake, test_registry};
use super::*;

#[test]
fn one_connection_per_project() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));

    let a = registry.connection("p1");
    let b = registry.connection("p1");
    let c = registry.connection("p2");

    a.add_listener(|_| {});
    assert_eq!(b.listener_count(), 1);
    assert_eq!(c.listener_count(), 0);
    assert_eq!(registry.connection_count(), 2);
    assert_eq!(connector.opened(), 2);
}

#[test]
fn readiness_follows_handshake() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));
    assert!(!registry.is_ready("p1"));

    complete_handshake(&registry, &connector, "p1");
    assert!(registry.is_ready("p1"));
    assert!(!registry.is_ready("p2"));
}

#[test]
fn listeners_are_scoped_to_project() {
    let (registry, _connector) = test_registry(Arc::new(ScriptedHistory::new()));
    let id = registry.add_listener("p1", |_| {});
    assert_eq!(registry.connection("p1").listener_count(), 1);

    assert!(!registry.remove_listener("p2", id));
    assert!(registry.remove_listener("p1", id));
    assert_eq!(registry.connection("p1").listener_count(), 0);
}

#[test]
fn send_stamps_project_id() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));
    registry.send("p1", Message::handshake("web"), None).unwrap();

    let frames = connector.take_outbound("p1");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["projectid"], "p1");
    assert!(frames[0]["event-id"].is_i64());
}

#[test]
fn send_routes_reply_to_handler_once() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let handler: ReplyHandler = Box::new(move |reply: Message| {
        sink.lock().unwrap().push(reply.envelope.event_id);
    });
    let event_id = registry
        .send("p1", Message::action("stop", serde_json::Map::new()), Some(handler))
        .unwrap();
    assert_eq!(connector.take_outbound("p1").len(), 1);

    let reply = json!({"event-type": "action", "event-id": event_id, "payload": {"result": 1}});
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    registry.add_listener("p1", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    registry.connection("p1").receive_text(&reply.to_string());
    registry.connection("p1").receive_text(&reply.to_string());

    assert_eq!(*replies.lock().unwrap(), vec![Some(event_id)]);
    // The second copy no longer matches a pending reply.
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn closed_connection_stays_until_reconnect() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));
    complete_handshake(&registry, &connector, "p1");

    registry.connection("p1").close();
    assert!(!registry.is_ready("p1"));
    assert_eq!(connector.opened(), 1);

    let fresh = registry.reconnect("p1");
    assert!(!fresh.is_ready());
    assert_eq!(connector.opened(), 2);
}

#[test]
fn dispose_all_closes_and_forgets() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));
    complete_handshake(&registry, &connector, "p1");
    let old = registry.connection("p1");

    registry.dispose_all();
    assert!(!old.is_ready());
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn invoke_action_correlates_reply() {
    let (registry, connector) = test_registry(Arc::new(ScriptedHistory::new()));
    complete_handshake(&registry, &connector, "p1");

    let caller = Arc::clone(&registry);
    let pending = tokio::spawn(async move {
        let mut args = Map::new();
        args.insert("lr".to_owned(), json!(0.1));
        caller.invoke_action("p1", "r1", "set_lr", args).await
    });
    tokio::task::yield_now().await;

    let frames = connector.take_outbound("p1");
    let action = frames.iter().find(|f| f["event-type"] == "action").unwrap();
    assert_eq!(action["runid"], "r1");
    assert_eq!(action["payload"]["name"], "set_lr");
    assert_eq!(action["payload"]["args"]["lr"], json!(0.1));

    let reply = json!({"event-type": "action", "event-id": action["event-id"], "payload": {"result": "ok"}});
    registry.connection("p1").receive_text(&reply.to_string());

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.event_id(), action["event-id"].as_i64());
}
