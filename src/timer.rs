//! Idle coalescing timer.
//!
//! `IdleTimer` runs a callback once, after at most `timeout`, or earlier when
//! the host signals spare capacity through an [`IdleSignal`]. It is used to
//! collapse bursts of live deltas into a single flush.
//!
//! Arming is tracked with a generation counter: `schedule` and `cancel` bump
//! it, and a fired task only runs the callback if its generation is still
//! current. Firings are serialized by an async mutex, so the callback never
//! overlaps itself. The callback may call `schedule` or `cancel` on its own
//! timer.
//!
//! Must be used from inside a tokio runtime.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::observable::Observable;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Host-driven hint that there is idle capacity to run deferred work now.
#[derive(Clone, Default)]
pub struct IdleSignal {
    notify: Arc<Notify>,
}

impl IdleSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every timer currently waiting on this signal.
    pub fn notify_idle(&self) {
        self.notify.notify_waiters();
    }

    async fn idle(&self) {
        self.notify.notified().await;
    }
}

/// One-shot, re-armable, cancelable deferred callback.
#[derive(Clone)]
pub struct IdleTimer {
    shared: Arc<TimerShared>,
}

struct TimerShared {
    callback: Callback,
    idle: Option<IdleSignal>,
    state: Mutex<TimerState>,
    firing: tokio::sync::Mutex<()>,
    running: Observable<bool>,
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    armed: bool,
    task: Option<JoinHandle<()>>,
}

impl IdleTimer {
    /// Timer without an idle source: always waits the full timeout.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(Arc::new(callback), None)
    }

    /// Timer that fires early when `idle` is signalled.
    pub fn with_idle<F>(callback: F, idle: IdleSignal) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(Arc::new(callback), Some(idle))
    }

    fn build(callback: Callback, idle: Option<IdleSignal>) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                callback,
                idle,
                state: Mutex::new(TimerState::default()),
                firing: tokio::sync::Mutex::new(()),
                running: Observable::new(false),
            }),
        }
    }

    /// Arm the timer. A previous arm is cancelled first.
    pub fn schedule(&self, timeout: Duration) {
        let shared = &self.shared;
        let was_running = {
            let mut state = shared.lock_state();
            let was_running = state.armed;
            state.generation = state.generation.wrapping_add(1);
            state.armed = true;
            if let Some(task) = state.task.take() {
                task.abort();
            }

            let generation = state.generation;
            let weak = Arc::downgrade(shared);
            let idle = shared.idle.clone();
            state.task = Some(tokio::spawn(async move {
                match idle {
                    Some(idle) => {
                        tokio::select! {
                            () = tokio::time::sleep(timeout) => {}
                            () = idle.idle() => {}
                        }
                    }
                    None => tokio::time::sleep(timeout).await,
                }
                fire(weak, generation).await;
            }));
            was_running
        };

        if !was_running {
            shared.running.set(true);
        }
    }

    /// Disarm the timer. No-op when not armed.
    pub fn cancel(&self) {
        let cancelled = {
            let mut state = self.shared.lock_state();
            if state.armed {
                state.armed = false;
                state.generation = state.generation.wrapping_add(1);
                if let Some(task) = state.task.take() {
                    task.abort();
                }
                true
            } else {
                false
            }
        };
        if cancelled {
            self.shared.running.set(false);
        }
    }

    /// True between `schedule` and the end of the callback.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lock_state().armed
    }

    /// Reactive view of [`IdleTimer::is_running`].
    #[must_use]
    pub fn running(&self) -> Observable<bool> {
        self.shared.running.clone()
    }
}

impl TimerShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn fire(weak: Weak<TimerShared>, generation: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let _firing = shared.firing.lock().await;

    {
        let mut state = shared.lock_state();
        if state.generation != generation {
            return;
        }
        // This task is the armed one; detach its own handle.
        state.task = None;
    }

    (shared.callback)();

    let finished = {
        let mut state = shared.lock_state();
        if state.generation == generation {
            state.armed = false;
            true
        } else {
            false
        }
    };
    if finished {
        shared.running.set(false);
    }
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;
