use std::sync::atomic::AtomicUsize;

use super::*;

#[test]
fn get_returns_initial_then_latest_value() {
    let cell = Observable::new(1);
    assert_eq!(cell.get(), 1);
    cell.set(2);
    assert_eq!(cell.get(), 2);
}

#[test]
fn subscribers_see_every_set() {
    let cell = Observable::new(0);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _guard = cell.subscribe(move |v| sink.lock().unwrap().push(*v));

    cell.set(1);
    cell.set(2);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[test]
fn dropping_guard_detaches_callback() {
    let cell = Observable::new(0);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let guard = cell.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(cell.subscriber_count(), 1);

    drop(guard);
    cell.set(5);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(cell.subscriber_count(), 0);
}

#[test]
fn explicit_unsubscribe_is_idempotent() {
    let cell = Observable::new(0);
    let mut guard = cell.subscribe(|_| {});
    guard.unsubscribe();
    guard.unsubscribe();
    assert_eq!(cell.subscriber_count(), 0);
}

#[test]
fn callback_may_set_the_same_cell() {
    let cell = Observable::new(0);
    let inner = cell.clone();
    let _guard = cell.subscribe(move |v| {
        if *v == 1 {
            inner.set(2);
        }
    });
    cell.set(1);
    assert_eq!(cell.get(), 2);
}

#[test]
fn guard_outliving_cell_does_not_panic() {
    let cell = Observable::new(0);
    let guard = cell.subscribe(|_| {});
    drop(cell);
    drop(guard);
}

#[tokio::test]
async fn watch_receiver_observes_set() {
    let cell = Observable::new(false);
    let mut rx = cell.watch();
    let writer = cell.clone();
    tokio::spawn(async move { writer.set(true) });
    let ready = rx.wait_for(|v| *v).await.map(|v| *v);
    assert_eq!(ready.ok(), Some(true));
}
