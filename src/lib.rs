//! runboard: live sync client for experiment-monitoring backends.
//!
//! A backend records logs, scalars, images, progress and hardware samples
//! from long-running jobs and serves them two ways: HTTP history queries and
//! a per-project websocket of live deltas. This crate turns the pair into
//! self-updating, bounded, ordered sequences a dashboard can render.
//!
//! DESIGN
//! ======
//! - [`registry::Registry`] owns one [`connection::Connection`] per project.
//! - [`sync::open_subscription`] runs the snapshot-then-deltas state machine
//!   for a [`sync::SubscriptionKey`] and publishes an
//!   [`observable::Observable`] render state.
//! - [`adapters`] provide typed subscriptions per event type.
//! - [`condition`], [`window`] and [`timer`] are the small pure pieces the
//!   engine is built from.
//!
//! All async code runs on tokio; the websocket uses `tokio-tungstenite` and
//! HTTP uses `reqwest`. Message types and the JSON codec live in the `wire`
//! crate.

pub mod adapters;
pub mod api;
pub mod condition;
pub mod config;
pub mod connection;
pub mod observable;
pub mod registry;
pub mod sync;
pub mod timer;
pub mod types;
pub mod window;

pub use api::{ApiClient, ApiError, HistorySource};
pub use condition::{Condition, SortOrder};
pub use config::{ClientConfig, ConfigError, WsMode};
pub use connection::{Connection, ConnectionError, ReplyHandler};
pub use observable::{Observable, Unsubscribe};
pub use registry::{Registry, RegistryError};
pub use sync::{
    Phase, RenderState, Sequenced, Subscription, SubscriptionKey, SubscriptionSlot, SyncError,
    SyncSpec, open_subscription,
};
pub use wire::{self, EventKind, Message};
