//! Run logs.

use serde_json::Value;
use wire::{Event, EventKind, LogPayload, Message};

use super::{decode_metadata, record_id, record_str};
use crate::sync::{Sequenced, SubscriptionKey, SyncSpec};

/// Newest log lines kept per run.
pub const LOG_WINDOW: usize = 1000;

/// Series that raise a user notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationLevel {
    /// `mention`: the run addressed the user.
    Info,
    /// `error`
    Error,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub timestamp: Option<String>,
    pub run_id: Option<String>,
    pub series: Option<String>,
    pub whom: Option<String>,
    pub message: String,
}

impl LogEntry {
    #[must_use]
    pub fn from_record(record: &Value) -> Option<Self> {
        let payload: LogPayload = decode_metadata(record)?;
        Some(Self {
            id: record_id(record),
            timestamp: record_str(record, "timestamp"),
            run_id: record_str(record, "runid"),
            series: record_str(record, "series").or(payload.series),
            whom: payload.whom,
            message: payload.message,
        })
    }

    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        let Event::Log(payload) = &message.event else {
            return None;
        };
        Some(Self {
            id: message.envelope.id,
            timestamp: message.envelope.timestamp.clone(),
            run_id: message.envelope.run_id.clone(),
            series: message.series().map(str::to_owned),
            whom: payload.whom.clone(),
            message: payload.message.clone(),
        })
    }

    #[must_use]
    pub fn notification_level(&self) -> Option<NotificationLevel> {
        match self.series.as_deref()? {
            "mention" => Some(NotificationLevel::Info),
            "error" => Some(NotificationLevel::Error),
            _ => None,
        }
    }
}

impl Sequenced for LogEntry {
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

/// The newest [`LOG_WINDOW`] log lines of a run.
#[must_use]
pub fn log_spec(project_id: &str, run_id: &str) -> SyncSpec<LogEntry> {
    let key = SubscriptionKey::new(project_id, EventKind::Log)
        .with_run(run_id)
        .with_limit(LOG_WINDOW);
    SyncSpec::new(key, LogEntry::from_record, LogEntry::from_message)
}
