//! Snapshot + live-delta synchronization engine.
//!
//! A [`Subscription`] keeps one ordered, bounded, de-duplicated sequence of
//! records for a [`SubscriptionKey`] (project, event type, run, series,
//! limit). It fetches a history snapshot over HTTP once the project socket is
//! ready, then folds matching live messages into it in coalesced batches.
//!
//! DESIGN
//! ======
//! Lifecycle: `Idle -> Fetching -> Synced`, with `Failed` when the snapshot
//! request errors and `TornDown` after close. The socket listener is
//! attached before the snapshot request goes out so deltas that race the
//! snapshot are queued, not lost. Queued deltas are applied by an
//! [`IdleTimer`] flush, never synchronously per message: a burst of N
//! deltas produces one replacement of the rendered sequence.
//!
//! De-duplication works on the sequencing key (`id` when both the last
//! retained item and the first queued item have one, otherwise
//! `timestamp`): queued items at or below the last retained key are
//! dropped, except items from a different run than the last retained one.
//! A custom reducer replaces both de-duplication and the bounded merge.
//!
//! Run, series and limit filters on live messages come from the same
//! effective condition the snapshot query is built from.
//!
//! The retained sequence is merged with slack (evict at `limit × 1.2`, trim
//! back to `limit`); the published view is always its newest `limit` items.
//!
//! The rendered value is swapped for a fresh `Arc` on every change, so
//! consumers can compare by pointer.
//!
//! ERROR HANDLING
//! ==============
//! Snapshot failures move the subscription to `Failed` and surface the
//! error in the render state; the listener is detached. A delta the
//! transform rejects is dropped and logged. Socket loss does not clear the
//! rendered data.
//!
//! The engine is written for cooperative scheduling: `close` is
//! synchronous, and on a current-thread runtime no flush can land after it
//! returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wire::{EventKind, Message};

use crate::api::{ApiError, HistorySource, history_path};
use crate::condition::{Condition, SortOrder};
use crate::connection::{Connection, ListenerId};
use crate::observable::{Observable, Unsubscribe};
use crate::registry::Registry;
use crate::timer::IdleTimer;
use crate::window;

// =============================================================================
// KEY
// =============================================================================

/// Identity of a subscription. Two subscriptions with equal keys observe the
/// same data; changing any field means a new subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub project_id: String,
    pub kind: EventKind,
    /// `None` subscribes to every run of the project.
    pub run_id: Option<String>,
    pub series: Option<String>,
    /// Keep only the newest `limit` items.
    pub limit: Option<usize>,
    /// Extra history conditions, overlaid on the ones derived above.
    pub conditions: Condition,
    /// Snapshot path override (relative to the API base).
    pub source: Option<String>,
}

impl SubscriptionKey {
    #[must_use]
    pub fn new(project_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            project_id: project_id.into(),
            kind,
            run_id: None,
            series: None,
            limit: None,
            conditions: Condition::default(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Condition) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn with_source(mut self, path: impl Into<String>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// History condition: run, series and limit (newest first), overlaid
    /// with the explicit conditions.
    #[must_use]
    pub fn condition(&self) -> Condition {
        let mut condition = Condition::new();
        if let Some(run_id) = &self.run_id {
            condition = condition.with_run_id(run_id.clone());
        }
        if let Some(series) = &self.series {
            condition = condition.with_series(series.clone());
        }
        if let Some(limit) = self.limit {
            condition = condition.with_limit(limit).with_order("id", SortOrder::Desc);
        }
        condition.merged(&self.conditions)
    }

    /// Run filter after the explicit conditions are applied.
    #[must_use]
    pub fn effective_run_id(&self) -> Option<&str> {
        self.conditions.run_id.as_deref().or(self.run_id.as_deref())
    }

    /// Series filter after the explicit conditions are applied.
    #[must_use]
    pub fn effective_series(&self) -> Option<&str> {
        self.conditions.series.as_deref().or(self.series.as_deref())
    }

    /// Window size after the explicit conditions are applied.
    #[must_use]
    pub fn effective_limit(&self) -> Option<usize> {
        self.conditions.limit.or(self.limit)
    }

    /// Whether the snapshot arrives newest first and must be reversed.
    fn snapshot_descending(&self) -> bool {
        self.source.is_none() && self.condition().order.get("id") == Some(&SortOrder::Desc)
    }

    /// Path of the snapshot request.
    #[must_use]
    pub fn snapshot_path(&self) -> String {
        match &self.source {
            Some(path) => path.clone(),
            None => history_path(&self.kind, &self.project_id, &self.condition()),
        }
    }

    /// Whether a live message belongs to this subscription. Run and series
    /// filters are the same ones the snapshot query uses.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        message.kind() == self.kind
            && self
                .effective_run_id()
                .is_none_or(|run_id| message.run_id() == Some(run_id))
            && self
                .effective_series()
                .is_none_or(|series| message.series() == Some(series))
    }
}

// =============================================================================
// ITEMS AND TRANSFORMS
// =============================================================================

/// Sequencing keys of a rendered item, used for de-duplication.
pub trait Sequenced {
    fn seq_id(&self) -> Option<i64> {
        None
    }

    fn seq_timestamp(&self) -> Option<&str> {
        None
    }

    fn seq_run_id(&self) -> Option<&str> {
        None
    }
}

impl Sequenced for String {}

impl Sequenced for Value {
    fn seq_id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_i64)
    }

    fn seq_timestamp(&self) -> Option<&str> {
        self.get("timestamp").and_then(Value::as_str)
    }

    fn seq_run_id(&self) -> Option<&str> {
        self.get("runid")
            .or_else(|| self.get("runId"))
            .and_then(Value::as_str)
    }
}

pub type HttpTransform<T> = Arc<dyn Fn(&Value) -> Option<T> + Send + Sync>;
pub type WsTransform<T> = Arc<dyn Fn(&Message) -> Option<T> + Send + Sync>;
pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;
/// Replaces the default bounded merge: `(retained, fresh) -> next`.
pub type Reducer<T> = Arc<dyn Fn(&[T], Vec<T>) -> Vec<T> + Send + Sync>;

/// Everything needed to open a subscription.
pub struct SyncSpec<T> {
    pub key: SubscriptionKey,
    pub transform_http: HttpTransform<T>,
    pub transform_ws: WsTransform<T>,
    /// Extra predicate on live messages after the key filter.
    pub filter: Option<MessageFilter>,
    pub reducer: Option<Reducer<T>>,
}

impl<T> Clone for SyncSpec<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            transform_http: Arc::clone(&self.transform_http),
            transform_ws: Arc::clone(&self.transform_ws),
            filter: self.filter.clone(),
            reducer: self.reducer.clone(),
        }
    }
}

impl<T> SyncSpec<T> {
    pub fn new<H, W>(key: SubscriptionKey, transform_http: H, transform_ws: W) -> Self
    where
        H: Fn(&Value) -> Option<T> + Send + Sync + 'static,
        W: Fn(&Message) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            key,
            transform_http: Arc::new(transform_http),
            transform_ws: Arc::new(transform_ws),
            filter: None,
            reducer: None,
        }
    }

    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn with_reducer<R>(mut self, reducer: R) -> Self
    where
        R: Fn(&[T], Vec<T>) -> Vec<T> + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("snapshot fetch failed: {0}")]
    Snapshot(#[from] ApiError),
    #[error("snapshot body is not a JSON array")]
    MalformedSnapshot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the project socket to become ready.
    Idle,
    Fetching,
    Synced,
    Failed,
    TornDown,
}

/// What a consumer renders.
#[derive(Debug)]
pub enum RenderState<T> {
    Loading,
    Ready(Arc<Vec<T>>),
    Failed(Arc<SyncError>),
}

impl<T> Clone for RenderState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Loading => Self::Loading,
            Self::Ready(items) => Self::Ready(Arc::clone(items)),
            Self::Failed(error) => Self::Failed(Arc::clone(error)),
        }
    }
}

impl<T> RenderState<T> {
    #[must_use]
    pub fn items(&self) -> Option<&Arc<Vec<T>>> {
        match self {
            Self::Ready(items) => Some(items),
            Self::Loading | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// Drop queued items already covered by `last`.
///
/// The sequencing key is `id` when both `last` and the first queued item
/// carry one, else `timestamp` under the same condition; with no common key
/// the queue passes through. An item survives only if its key is above
/// every key seen so far (so repeats inside one batch drop too). Items from
/// a different run than `last` are always kept.
pub fn drop_stale<T: Sequenced>(last: Option<&T>, queue: Vec<T>) -> Vec<T> {
    let (Some(last), Some(first)) = (last, queue.first()) else {
        return queue;
    };

    let other_run = |item: &T| match (item.seq_run_id(), last.seq_run_id()) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    };

    let keep: Vec<bool> = if let (Some(last_id), Some(_)) = (last.seq_id(), first.seq_id()) {
        let mut high = last_id;
        queue
            .iter()
            .map(|item| {
                if other_run(item) {
                    return true;
                }
                match item.seq_id() {
                    Some(id) if id > high => {
                        high = id;
                        true
                    }
                    _ => false,
                }
            })
            .collect()
    } else if let (Some(last_ts), Some(_)) = (last.seq_timestamp(), first.seq_timestamp()) {
        let mut high = last_ts;
        queue
            .iter()
            .map(|item| {
                if other_run(item) {
                    return true;
                }
                match item.seq_timestamp() {
                    Some(ts) if ts > high => {
                        high = ts;
                        true
                    }
                    _ => false,
                }
            })
            .collect()
    } else {
        return queue;
    };

    queue
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

struct SyncInner<T> {
    phase: Phase,
    /// `None` until the snapshot lands.
    retained: Option<Vec<T>>,
    queue: Vec<T>,
    /// A flush is armed and has not taken the queue yet.
    flush_pending: bool,
    published: bool,
    listener: Option<ListenerId>,
}

struct SyncShared<T> {
    spec: SyncSpec<T>,
    connection: Connection,
    flush_delay: Duration,
    timer: IdleTimer,
    inner: Mutex<SyncInner<T>>,
    rendered: Observable<RenderState<T>>,
    phase: Observable<Phase>,
    replacements: AtomicU64,
    setup: Mutex<Option<JoinHandle<()>>>,
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Live, self-updating view of one [`SubscriptionKey`]. Closing (or
/// dropping) it detaches from the socket and stops all updates.
pub struct Subscription<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    shared: Arc<SyncShared<T>>,
}

/// Open a subscription on `registry`.
///
/// Must be called from inside a tokio runtime.
pub fn open_subscription<T>(registry: &Registry, spec: SyncSpec<T>) -> Subscription<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    let connection = registry.connection(&spec.key.project_id);
    let idle = registry.idle_signal();
    let flush_delay = registry.config().flush_delay;

    let shared = Arc::new_cyclic(|weak: &Weak<SyncShared<T>>| {
        let weak = weak.clone();
        let timer = IdleTimer::with_idle(
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.flush();
                }
            },
            idle,
        );
        SyncShared {
            spec,
            connection,
            flush_delay,
            timer,
            inner: Mutex::new(SyncInner {
                phase: Phase::Idle,
                retained: None,
                queue: Vec::new(),
                flush_pending: false,
                published: false,
                listener: None,
            }),
            rendered: Observable::new(RenderState::Loading),
            phase: Observable::new(Phase::Idle),
            replacements: AtomicU64::new(0),
            setup: Mutex::new(None),
        }
    });

    tracing::debug!(key = ?shared.spec.key, "opening subscription");
    let ready = shared.connection.readiness().watch();
    let task = tokio::spawn(run_setup(Arc::downgrade(&shared), ready, registry.history()));
    *shared.setup.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

    Subscription { shared }
}

impl<T> Subscription<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn key(&self) -> &SubscriptionKey {
        &self.shared.spec.key
    }

    /// Reactive render state.
    #[must_use]
    pub fn rendered(&self) -> Observable<RenderState<T>> {
        self.shared.rendered.clone()
    }

    /// Current render state.
    #[must_use]
    pub fn state(&self) -> RenderState<T> {
        self.shared.rendered.get()
    }

    /// Current items, empty while loading or failed.
    #[must_use]
    pub fn items(&self) -> Arc<Vec<T>> {
        self.state().items().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.phase.get()
    }

    #[must_use]
    pub fn phase_changes(&self) -> Observable<Phase> {
        self.shared.phase.clone()
    }

    /// Number of times the rendered sequence has been replaced.
    #[must_use]
    pub fn replacements(&self) -> u64 {
        self.shared.replacements.load(Ordering::Relaxed)
    }

    /// Items queued but not flushed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock_inner().queue.len()
    }

    /// Detach and stop updating. Idempotent.
    pub fn close(&self) {
        self.shared.teardown();
    }
}

impl<T> Drop for Subscription<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

async fn run_setup<T>(
    weak: Weak<SyncShared<T>>,
    mut ready: watch::Receiver<bool>,
    history: Arc<dyn HistorySource>,
) where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    let became_ready = ready.wait_for(|ready| *ready).await.is_ok();
    if !became_ready {
        return;
    }
    let path = {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let Some(path) = shared.attach(&weak) else {
            return;
        };
        path
    };

    let result = history.get_json(&path).await;

    if let Some(shared) = weak.upgrade() {
        shared.apply_snapshot(result);
    }
}

impl<T> SyncShared<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, SyncInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        if self.phase.get() != phase {
            self.phase.set(phase);
        }
    }

    fn teardown(&self) {
        let listener = {
            let mut inner = self.lock_inner();
            if inner.phase == Phase::TornDown {
                return;
            }
            inner.phase = Phase::TornDown;
            inner.queue.clear();
            inner.retained = None;
            inner.flush_pending = false;
            inner.listener.take()
        };
        self.timer.cancel();
        if let Some(id) = listener {
            self.connection.remove_listener(id);
        }
        let task = self
            .setup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        tracing::debug!(key = ?self.spec.key, "subscription closed");
        self.rendered.set(RenderState::Loading);
        self.set_phase(Phase::TornDown);
    }

    /// Attach the socket listener and enter `Fetching`. Returns the snapshot
    /// path, or `None` if the subscription was closed meanwhile.
    fn attach(&self, weak: &Weak<Self>) -> Option<String> {
        {
            let mut inner = self.lock_inner();
            if inner.phase != Phase::Idle {
                return None;
            }
            let weak = weak.clone();
            let id = self.connection.add_listener(move |message| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_message(message);
                }
            });
            inner.listener = Some(id);
            inner.phase = Phase::Fetching;
        }
        self.set_phase(Phase::Fetching);
        let path = self.spec.key.snapshot_path();
        tracing::debug!(key = ?self.spec.key, %path, "fetching snapshot");
        Some(path)
    }

    fn on_message(&self, message: &Message) {
        if !self.spec.key.matches(message) {
            return;
        }
        if let Some(filter) = &self.spec.filter {
            if !filter(message) {
                return;
            }
        }
        let Some(item) = (self.spec.transform_ws)(message) else {
            tracing::debug!(key = ?self.spec.key, "live message rejected by transform");
            return;
        };

        let arm = {
            let mut inner = self.lock_inner();
            match inner.phase {
                Phase::Fetching | Phase::Synced => {}
                Phase::Idle | Phase::Failed | Phase::TornDown => return,
            }
            inner.queue.push(item);
            let arm = inner.retained.is_some() && !inner.flush_pending;
            if arm {
                inner.flush_pending = true;
            }
            arm
        };
        // May run inside a flush that already took the queue; the timer
        // queues the new arm behind the running callback.
        if arm {
            self.timer.schedule(self.flush_delay);
        }
    }

    fn apply_snapshot(&self, result: Result<Value, ApiError>) {
        let records = match result {
            Ok(Value::Array(records)) => Ok(records),
            Ok(_) => Err(SyncError::MalformedSnapshot),
            Err(e) => Err(SyncError::Snapshot(e)),
        };

        let records = match records {
            Ok(records) => records,
            Err(error) => {
                let listener = {
                    let mut inner = self.lock_inner();
                    if inner.phase != Phase::Fetching {
                        return;
                    }
                    inner.phase = Phase::Failed;
                    inner.queue.clear();
                    inner.listener.take()
                };
                if let Some(id) = listener {
                    self.connection.remove_listener(id);
                }
                tracing::warn!(key = ?self.spec.key, error = %error, "snapshot failed");
                self.rendered.set(RenderState::Failed(Arc::new(error)));
                self.set_phase(Phase::Failed);
                return;
            }
        };

        let mut items: Vec<T> = records
            .iter()
            .filter_map(|record| (self.spec.transform_http)(record))
            .collect();
        if items.len() < records.len() {
            tracing::debug!(
                key = ?self.spec.key,
                rejected = records.len() - items.len(),
                "snapshot records rejected by transform"
            );
        }
        if self.spec.key.snapshot_descending() {
            items.reverse();
        }

        {
            let mut inner = self.lock_inner();
            if inner.phase != Phase::Fetching {
                return;
            }
            inner.retained = Some(items);
            inner.phase = Phase::Synced;
            inner.flush_pending = true;
        }
        self.set_phase(Phase::Synced);
        self.timer.schedule(self.flush_delay);
    }

    fn flush(&self) {
        let view = {
            let mut inner = self.lock_inner();
            if inner.phase != Phase::Synced {
                return;
            }
            inner.flush_pending = false;
            let queue = std::mem::take(&mut inner.queue);
            if queue.is_empty() && inner.published {
                return;
            }
            let Some(retained) = inner.retained.as_deref() else {
                return;
            };

            let limit = self.spec.key.effective_limit();
            let next = match &self.spec.reducer {
                // A reducer owns de-duplication as well as merging.
                Some(reducer) => reducer(retained, queue),
                None => {
                    let queued = queue.len();
                    let fresh = drop_stale(retained.last(), queue);
                    if queued > fresh.len() {
                        tracing::debug!(key = ?self.spec.key, dropped = queued - fresh.len(), "dropped stale deltas");
                    }
                    if fresh.is_empty() && inner.published {
                        return;
                    }
                    window::merge_bounded(retained, &fresh, limit, limit.map(window::evict_threshold))
                }
            };
            let view = window::newest(&next, limit).to_vec();
            inner.retained = Some(next);
            inner.published = true;
            view
        };

        tracing::debug!(key = ?self.spec.key, len = view.len(), "flush");
        self.replacements.fetch_add(1, Ordering::Relaxed);
        self.rendered.set(RenderState::Ready(Arc::new(view)));
    }
}

// =============================================================================
// SLOT
// =============================================================================

/// Stable handle over a subscription whose key may change or be cleared.
///
/// Setting a different key closes the current subscription before opening
/// the next; setting an equal key is a no-op. With no key the slot renders
/// `Loading` and touches nothing.
pub struct SubscriptionSlot<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    registry: Arc<Registry>,
    current: Option<(Subscription<T>, Unsubscribe)>,
    rendered: Observable<RenderState<T>>,
}

impl<T> SubscriptionSlot<T>
where
    T: Sequenced + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            current: None,
            rendered: Observable::new(RenderState::Loading),
        }
    }

    /// Switch to `spec`, or disable with `None`.
    pub fn set(&mut self, spec: Option<SyncSpec<T>>) {
        let unchanged = match (&self.current, &spec) {
            (Some((subscription, _)), Some(spec)) => subscription.key() == &spec.key,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        if let Some((subscription, mut forward)) = self.current.take() {
            forward.unsubscribe();
            subscription.close();
        }
        if !self.rendered.get().is_loading() {
            self.rendered.set(RenderState::Loading);
        }

        if let Some(spec) = spec {
            let subscription = open_subscription(&self.registry, spec);
            let target = self.rendered.clone();
            let forward = subscription.rendered().subscribe(move |state| target.set(state.clone()));
            self.current = Some((subscription, forward));
        }
    }

    pub fn clear(&mut self) {
        self.set(None);
    }

    #[must_use]
    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.current.as_ref().map(|(subscription, _)| subscription.key())
    }

    #[must_use]
    pub fn subscription(&self) -> Option<&Subscription<T>> {
        self.current.as_ref().map(|(subscription, _)| subscription)
    }

    /// Render state that survives key changes.
    #[must_use]
    pub fn rendered(&self) -> Observable<RenderState<T>> {
        self.rendered.clone()
    }

    #[must_use]
    pub fn state(&self) -> RenderState<T> {
        self.rendered.get()
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
