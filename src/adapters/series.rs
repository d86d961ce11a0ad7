//! Series names observed for a run and event type.
//!
//! The list is itself a subscription: the snapshot comes from the series
//! endpoint and every live message of the type contributes its series tag.
//! The reducer is a set union that keeps first-seen order.

use std::collections::HashSet;

use serde_json::Value;
use wire::{EventKind, Message};

use crate::api::series_path;
use crate::sync::{SubscriptionKey, SyncSpec};

/// Append names from `fresh` not already in `known`.
#[must_use]
pub fn union_names(known: &[String], fresh: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = known.iter().cloned().collect();
    let mut out = known.to_vec();
    for name in fresh {
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}

#[must_use]
pub fn series_spec(project_id: &str, run_id: &str, kind: EventKind) -> SyncSpec<String> {
    let source = series_path(project_id, &kind, run_id);
    let key = SubscriptionKey::new(project_id, kind)
        .with_run(run_id)
        .with_source(source);
    SyncSpec::new(
        key,
        |record: &Value| record.as_str().map(str::to_owned),
        |message: &Message| message.series().map(str::to_owned),
    )
    .with_reducer(union_names)
}
