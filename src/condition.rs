//! Canonical encoding of history query conditions.
//!
//! The encoded string is both the `condition` query parameter of snapshot
//! requests and part of a subscription's identity, so encoding must be
//! deterministic: struct fields serialize in declaration order and the
//! ordering map is a `BTreeMap`, which iterates its keys sorted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single value or an inclusive `[from, to]` range.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SingleOrRange<T> {
    Single(T),
    Range(T, T),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

/// Structured history query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SingleOrRange<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SingleOrRange<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub order: BTreeMap<String, SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(rename = "runId", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_order(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order.insert(column.into(), order);
        self
    }

    /// Overlay `other` on top of `self`: every field set in `other` wins,
    /// ordering maps are merged key by key.
    #[must_use]
    pub fn merged(mut self, other: &Condition) -> Self {
        if other.id.is_some() {
            self.id.clone_from(&other.id);
        }
        if other.timestamp.is_some() {
            self.timestamp.clone_from(&other.timestamp);
        }
        if other.series.is_some() {
            self.series.clone_from(&other.series);
        }
        for (column, order) in &other.order {
            self.order.insert(column.clone(), *order);
        }
        if other.limit.is_some() {
            self.limit = other.limit;
        }
        if other.run_id.is_some() {
            self.run_id.clone_from(&other.run_id);
        }
        self
    }

    /// Canonical JSON form, e.g. `{"series":"loss","limit":10,"runId":"r1"}`.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Serializing plain fields into a String cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Query-string fragment `condition=<url-encoded json>`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("condition={}", urlencoding::encode(&self.to_json()))
    }
}

/// Free-function form of [`Condition::encode`].
#[must_use]
pub fn encode(condition: &Condition) -> String {
    condition.encode()
}

#[cfg(test)]
#[path = "condition_test.rs"]
mod tests;
