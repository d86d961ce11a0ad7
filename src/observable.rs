//! Observable value cell.
//!
//! `Observable<T>` is the reactive state container used for connection
//! readiness, timer state, and rendered sequences. It offers synchronous
//! callbacks (`subscribe`) for UI bindings and a `tokio::sync::watch`
//! receiver (`watch`) for async code that needs to await a condition.
//!
//! Callbacks run on the thread that calls `set`, outside of any internal
//! lock, so a callback may subscribe, unsubscribe, or set again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Shared, cloneable value cell with change notification.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    tx: watch::Sender<T>,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self {
            shared: Arc::new(Shared {
                tx,
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.shared.tx.borrow().clone()
    }

    /// Replace the value and notify every subscriber.
    pub fn set(&self, value: T) {
        self.shared.tx.send_replace(value.clone());
        for callback in self.callbacks_snapshot() {
            callback(&value);
        }
    }

    /// Subscribe to changes. The callback is not invoked with the current
    /// value. Dropping (or calling `unsubscribe` on) the returned guard
    /// detaches it.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        let weak = Arc::downgrade(&self.shared);
        Unsubscribe {
            detach: Some(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared
                        .callbacks
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Async receiver that observes every subsequent `set`.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<T> {
        self.shared.tx.subscribe()
    }

    /// Number of attached callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn callbacks_snapshot(&self) -> Vec<Callback<T>> {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Observable").field(&self.get()).finish()
    }
}

/// Guard returned by [`Observable::subscribe`]; detaches on drop.
#[must_use = "dropping the guard immediately unsubscribes"]
pub struct Unsubscribe {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    /// Detach now. Further calls (and the eventual drop) are no-ops.
    pub fn unsubscribe(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
#[path = "observable_test.rs"]
mod tests;
