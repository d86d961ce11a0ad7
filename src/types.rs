//! REST response DTOs for project and run metadata.
//!
//! DESIGN
//! ======
//! Field names follow the backend's JSON (`runids`, `runId`); every field
//! defaults so older servers that omit a key still decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /project/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectStatus {
    pub name: Option<String>,
    /// True while at least one run of the project is connected.
    pub online: bool,
    /// Known runs, oldest first.
    pub runids: Vec<RunInfo>,
}

/// One run listed in a [`ProjectStatus`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunInfo {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub timestamp: Option<String>,
    pub online: bool,
    /// Free-form run metadata; `name` and `notes` are set through
    /// [`crate::api::ApiClient::update_run`].
    pub metadata: Value,
}

impl RunInfo {
    /// Display name from metadata, falling back to the run id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.metadata
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.run_id)
    }
}

/// `GET /project/{id}/run/{runId}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStatus {
    /// Actions the run accepts, keyed by action name.
    pub action: BTreeMap<String, ActionInfo>,
    pub platform: BTreeMap<String, Value>,
    pub hyperparameters: Value,
}

/// Description of one remotely invokable action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionInfo {
    /// Argument name to type annotation, e.g. `{"lr": "float"}`.
    pub args: BTreeMap<String, String>,
    /// The run stops its training loop while the action executes.
    pub blocking: bool,
    pub description: Option<String>,
}

/// Body of `PUT /project/{id}/run/{runId}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RunUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.notes.is_none()
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
