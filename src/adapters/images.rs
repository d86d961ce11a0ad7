//! Images logged by a run, one subscription per series.

use serde_json::{Map, Value};
use wire::{Event, EventKind, Message};

use super::{record_metadata, record_str};
use crate::api::image_path;
use crate::sync::{Sequenced, SubscriptionKey, SyncSpec};

/// Newest images kept per series.
pub const IMAGE_WINDOW: usize = 1000;

#[derive(Clone, Debug, PartialEq)]
pub struct ImageEntry {
    /// Stored image id; also the sequencing key.
    pub image_id: i64,
    pub run_id: Option<String>,
    pub series: Option<String>,
    pub metadata: Map<String, Value>,
}

impl ImageEntry {
    /// History records carry `imageId` and the metadata as a JSON string.
    #[must_use]
    pub fn from_record(record: &Value) -> Option<Self> {
        let image_id = record.get("imageId").and_then(Value::as_i64)?;
        let metadata = record_metadata(record);
        Some(Self {
            image_id,
            run_id: record_str(record, "runid"),
            series: metadata
                .get("series")
                .and_then(Value::as_str)
                .map(str::to_owned),
            metadata,
        })
    }

    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        let Event::Image(payload) = &message.event else {
            return None;
        };
        let image_id = payload.image_id.or(message.envelope.id)?;
        Some(Self {
            image_id,
            run_id: message.envelope.run_id.clone(),
            series: message.series().map(str::to_owned),
            metadata: payload.metadata.clone(),
        })
    }

    /// Absolute URL of the image bytes under `api_base`.
    #[must_use]
    pub fn url(&self, api_base: &str, project_id: &str) -> String {
        format!(
            "{}{}",
            api_base.trim_end_matches('/'),
            image_path(project_id, self.image_id)
        )
    }
}

impl Sequenced for ImageEntry {
    fn seq_id(&self) -> Option<i64> {
        Some(self.image_id)
    }

    fn seq_run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}

#[must_use]
pub fn image_spec(project_id: &str, run_id: &str, series: &str) -> SyncSpec<ImageEntry> {
    let key = SubscriptionKey::new(project_id, EventKind::Image)
        .with_run(run_id)
        .with_series(series)
        .with_limit(IMAGE_WINDOW);
    SyncSpec::new(key, ImageEntry::from_record, ImageEntry::from_message)
}
