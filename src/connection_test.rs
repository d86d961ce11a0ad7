use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use super::*;

fn sent(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let text = rx.try_recv().expect("outbound frame");
    serde_json::from_str(&text).expect("outbound json")
}

fn counting_listener(connection: &Connection) -> (ListenerId, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let id = connection.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (id, hits)
}

#[test]
fn handshake_reply_marks_ready() {
    let (connection, mut rx) = Connection::detached("p1");
    assert!(!connection.is_ready());

    connection.handshake();
    let frame = sent(&mut rx);
    assert_eq!(frame["event-type"], "handshake");
    assert_eq!(frame["who"], "web");
    assert_eq!(frame["projectid"], "p1");

    let event_id = frame["event-id"].as_i64().unwrap();
    connection.receive_text(&json!({"event-type": "handshake", "event-id": event_id}).to_string());
    assert!(connection.is_ready());
}

#[test]
fn event_ids_are_unique_and_increasing() {
    let (connection, mut rx) = Connection::detached("p1");
    let a = connection.send(Message::handshake("web"), None).unwrap();
    let b = connection.send(Message::handshake("web"), None).unwrap();
    assert!(b > a);
    assert_eq!(a % 1000, 0);
    assert_eq!(sent(&mut rx)["event-id"], a);
    assert_eq!(sent(&mut rx)["event-id"], b);
}

#[test]
fn reply_callback_runs_once_and_skips_listeners() {
    let (connection, _rx) = Connection::detached("p1");
    let (_id, listener_hits) = counting_listener(&connection);

    let replies = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&replies);
    let event_id = connection
        .send(
            Message::action("stop", serde_json::Map::new()),
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    let reply = json!({"event-type": "action", "event-id": event_id, "payload": {"result": true}});
    connection.receive_text(&reply.to_string());
    assert_eq!(replies.load(Ordering::SeqCst), 1);
    assert_eq!(listener_hits.load(Ordering::SeqCst), 0);

    // A second message with the same id is no longer a reply.
    connection.receive_text(&reply.to_string());
    assert_eq!(replies.load(Ordering::SeqCst), 1);
    assert_eq!(listener_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn listeners_receive_every_unmatched_message() {
    let (connection, _rx) = Connection::detached("p1");
    let (_a, hits_a) = counting_listener(&connection);
    let (_b, hits_b) = counting_listener(&connection);

    let frame = json!({"event-type": "scalar", "runid": "r1", "payload": {"series": "loss", "x": 1, "y": 0.5}});
    connection.receive_text(&frame.to_string());
    connection.receive_text(&frame.to_string());

    assert_eq!(hits_a.load(Ordering::SeqCst), 2);
    assert_eq!(hits_b.load(Ordering::SeqCst), 2);
}

#[test]
fn removed_listener_stops_receiving() {
    let (connection, _rx) = Connection::detached("p1");
    let (id, hits) = counting_listener(&connection);
    assert_eq!(connection.listener_count(), 1);

    assert!(connection.remove_listener(id));
    assert!(!connection.remove_listener(id));
    assert_eq!(connection.listener_count(), 0);

    connection.receive_text(r#"{"event-type":"log","payload":{"message":"hi"}}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn malformed_frames_are_dropped() {
    let (connection, _rx) = Connection::detached("p1");
    let (_id, hits) = counting_listener(&connection);

    connection.receive_text("not json");
    connection.receive_text("[1,2,3]");
    connection.receive_text(r#"{"payload":{}}"#);
    connection.receive_text(r#"{"event-type":"scalar","payload":{"x":"nope"}}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    connection.receive_text(r#"{"event-type":"log","payload":{"message":"ok"}}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_event_types_still_reach_listeners() {
    let (connection, _rx) = Connection::detached("p1");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    connection.add_listener(move |message| {
        sink.lock().unwrap().push(message.kind());
    });

    connection.receive_text(r#"{"event-type":"custom","payload":{"a":1}}"#);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![wire::EventKind::Other("custom".to_owned())]
    );
}

#[test]
fn panicking_listener_does_not_block_others() {
    let (connection, _rx) = Connection::detached("p1");
    connection.add_listener(|_| panic!("listener bug"));
    let (_id, hits) = counting_listener(&connection);

    connection.receive_text(r#"{"event-type":"log","payload":{"message":"a"}}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn listener_may_remove_itself_during_dispatch() {
    let (connection, _rx) = Connection::detached("p1");
    let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
    let hits = Arc::new(AtomicUsize::new(0));

    let inner = connection.clone();
    let inner_slot = Arc::clone(&slot);
    let counter = Arc::clone(&hits);
    let id = connection.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(id) = *inner_slot.lock().unwrap() {
            inner.remove_listener(id);
        }
    });
    *slot.lock().unwrap() = Some(id);

    connection.receive_text(r#"{"event-type":"log","payload":{"message":"a"}}"#);
    connection.receive_text(r#"{"event-type":"log","payload":{"message":"b"}}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(connection.listener_count(), 0);
}

#[test]
fn send_after_receiver_dropped_is_closed() {
    let (connection, rx) = Connection::detached("p1");
    drop(rx);
    let err = connection.send(Message::handshake("web"), None).unwrap_err();
    assert!(matches!(err, ConnectionError::Closed));
}

#[test]
fn mark_closed_clears_readiness() {
    let (connection, mut rx) = Connection::detached("p1");
    connection.handshake();
    let event_id = sent(&mut rx)["event-id"].as_i64().unwrap();
    connection.receive_text(&json!({"event-type": "handshake", "event-id": event_id}).to_string());
    assert!(connection.is_ready());

    connection.mark_closed();
    assert!(!connection.is_ready());
}

#[tokio::test(start_paused = true)]
async fn send_and_wait_resolves_with_reply() {
    let (connection, mut rx) = Connection::detached("p1");
    let responder = connection.clone();
    let waiter = tokio::spawn(async move {
        responder
            .send_and_wait(Message::action("ping", serde_json::Map::new()), Duration::from_secs(5))
            .await
    });

    tokio::task::yield_now().await;
    let frame = sent(&mut rx);
    assert_eq!(frame["payload"]["name"], "ping");
    let reply = json!({
        "event-type": "action",
        "event-id": frame["event-id"],
        "payload": {"result": "pong"},
    });
    connection.receive_text(&reply.to_string());

    let reply = waiter.await.unwrap().unwrap();
    match reply.event {
        wire::Event::Action(payload) => assert_eq!(payload.result, Some(json!("pong"))),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn send_and_wait_times_out() {
    let (connection, _rx) = Connection::detached("p1");
    let err = connection
        .send_and_wait(Message::action("ping", serde_json::Map::new()), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::ReplyTimeout(_)));
}

#[tokio::test(start_paused = true)]
async fn send_and_wait_fails_when_connection_closes() {
    let (connection, _rx) = Connection::detached("p1");
    let closer = connection.clone();
    let waiter = tokio::spawn(async move {
        closer
            .send_and_wait(Message::action("ping", serde_json::Map::new()), Duration::from_secs(5))
            .await
    });

    tokio::task::yield_now().await;
    connection.mark_closed();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, ConnectionError::ReplyDropped(_)));
}
