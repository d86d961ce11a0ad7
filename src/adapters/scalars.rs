//! Scalar series points.

use serde_json::Value;
use wire::{Event, EventKind, Message, ScalarPayload};

use super::{decode_metadata, record_id, record_str};
use crate::sync::{Sequenced, SubscriptionKey, SyncSpec};

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarPoint {
    pub id: Option<i64>,
    pub run_id: Option<String>,
    pub x: f64,
    pub y: f64,
}

impl ScalarPoint {
    #[must_use]
    pub fn from_record(record: &Value) -> Option<Self> {
        let payload: ScalarPayload = decode_metadata(record)?;
        Some(Self {
            id: record_id(record),
            run_id: record_str(record, "runid"),
            x: payload.x,
            y: payload.y,
        })
    }

    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        let Event::Scalar(payload) = &message.event else {
            return None;
        };
        Some(Self {
            id: message.envelope.id,
            run_id: message.envelope.run_id.clone(),
            x: payload.x,
            y: payload.y,
        })
    }
}

impl Sequenced for ScalarPoint {
    fn seq_id(&self) -> Option<i64> {
        self.id
    }

    fn seq_run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}

/// Every point of one scalar series of a run.
#[must_use]
pub fn scalar_spec(project_id: &str, run_id: &str, series: &str) -> SyncSpec<ScalarPoint> {
    let key = SubscriptionKey::new(project_id, EventKind::Scalar)
        .with_run(run_id)
        .with_series(series);
    SyncSpec::new(key, ScalarPoint::from_record, ScalarPoint::from_message)
}
