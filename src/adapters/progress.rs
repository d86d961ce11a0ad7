//! Progress bars reported by a run.

use serde_json::Value;
use wire::{Event, EventKind, Message, ProgressPayload};

use super::{decode_metadata, record_id, record_str};
use crate::sync::{Sequenced, SubscriptionKey, SyncSpec};

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEntry {
    pub id: Option<i64>,
    pub timestamp: Option<String>,
    pub run_id: Option<String>,
    pub name: String,
    pub step: i64,
    pub current: Value,
    pub total: Option<i64>,
    /// Iterations per second; negative until measured.
    pub rate: f64,
}

impl ProgressEntry {
    fn from_payload(
        id: Option<i64>,
        timestamp: Option<String>,
        run_id: Option<String>,
        payload: ProgressPayload,
    ) -> Self {
        Self {
            id,
            timestamp,
            run_id,
            name: payload.name,
            step: payload.step,
            current: payload.current,
            total: payload.total,
            rate: payload.rate,
        }
    }

    #[must_use]
    pub fn from_record(record: &Value) -> Option<Self> {
        let payload: ProgressPayload = decode_metadata(record)?;
        Some(Self::from_payload(
            record_id(record),
            record_str(record, "timestamp"),
            record_str(record, "runid"),
            payload,
        ))
    }

    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        let Event::Progress(payload) = &message.event else {
            return None;
        };
        Some(Self::from_payload(
            message.envelope.id,
            message.envelope.timestamp.clone(),
            message.envelope.run_id.clone(),
            payload.clone(),
        ))
    }

    /// Completion in whole percent; `100` when the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn percentage(&self) -> i64 {
        match self.total {
            Some(total) if total != 0 => (100.0 * self.step as f64 / total as f64).round() as i64,
            _ => 100,
        }
    }
}

impl Sequenced for ProgressEntry {
    fn seq_id(&self) -> Option<i64> {
        self.id
    }

    fn seq_timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    fn seq_run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}

/// Progress updates of one named loop; the last item is the current state.
#[must_use]
pub fn progress_spec(project_id: &str, run_id: &str, series: &str) -> SyncSpec<ProgressEntry> {
    let key = SubscriptionKey::new(project_id, EventKind::Progress)
        .with_run(run_id)
        .with_series(series);
    SyncSpec::new(key, ProgressEntry::from_record, ProgressEntry::from_message)
}
