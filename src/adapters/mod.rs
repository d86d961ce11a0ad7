//! Typed subscriptions per event type.
//!
//! Each adapter pairs a record type with the two transforms the sync engine
//! needs: one from a history record (`{id, timestamp, series, metadata}`),
//! one from a live message. Both must produce the same item for the same
//! event so de-duplication can compare them.
//!
//! DESIGN
//! ======
//! Adapters are thin: a `*_spec` constructor builds the
//! [`crate::sync::SyncSpec`], and the record type implements
//! [`crate::sync::Sequenced`]. Anything view-specific
//! (percentages, notification levels, image URLs) lives on the record type.

pub mod actions;
pub mod hardware;
pub mod images;
pub mod logs;
pub mod progress;
pub mod scalars;
pub mod series;

pub use actions::{ActionOutcome, build_args, default_args, invoke_action};
pub use hardware::{CpuSample, HARDWARE_WINDOW, HardwareSample, hardware_spec, normalize_cpus};
pub use images::{IMAGE_WINDOW, ImageEntry, image_spec};
pub use logs::{LOG_WINDOW, LogEntry, NotificationLevel, log_spec};
pub use progress::{ProgressEntry, progress_spec};
pub use scalars::{ScalarPoint, scalar_spec};
pub use series::{series_spec, union_names};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// `metadata` of a history record as an object. Older servers store it as
/// a JSON-encoded string.
pub(crate) fn record_metadata(record: &Value) -> Map<String, Value> {
    match record.get("metadata") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

/// Decode `metadata` into a payload type, `None` if it does not fit.
pub(crate) fn decode_metadata<T: DeserializeOwned>(record: &Value) -> Option<T> {
    let metadata = Value::Object(record_metadata(record));
    match serde_json::from_value(metadata) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::debug!(error = %e, "history record metadata does not decode");
            None
        }
    }
}

pub(crate) fn record_id(record: &Value) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

pub(crate) fn record_str(record: &Value, field: &str) -> Option<String> {
    record.get(field).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
