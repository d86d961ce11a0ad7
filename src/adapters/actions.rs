//! Remote action invocation.
//!
//! Arguments travel as strings in the run's own literal syntax (`"True"`,
//! `"0.1"`, `'"name"'`); the run parses them against its declared types.

use serde_json::{Map, Value};
use wire::{Event, Message};

use crate::connection::ConnectionError;
use crate::registry::Registry;
use crate::types::ActionInfo;

/// Result carried by an action reply.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    Succeeded(Value),
    Failed(String),
}

impl ActionOutcome {
    /// Interpret a reply message.
    #[must_use]
    pub fn from_reply(reply: &Message) -> Self {
        match &reply.event {
            Event::Action(payload) => match payload.error_message() {
                Some(error) => Self::Failed(error),
                None => Self::Succeeded(payload.result.clone().unwrap_or(Value::Null)),
            },
            other => Self::Failed(format!("unexpected reply event: {}", other.kind())),
        }
    }
}

/// Initial argument values for a declared action: empty string literal for
/// `str`, `False` for `bool`, blank otherwise.
#[must_use]
pub fn default_args(info: &ActionInfo) -> Map<String, Value> {
    info.args
        .iter()
        .map(|(name, kind)| {
            let initial = match kind.as_str() {
                "str" => "\"\"",
                "bool" => "False",
                _ => "",
            };
            (name.clone(), Value::String(initial.to_owned()))
        })
        .collect()
}

/// Overlay `name=value` pairs on the declared defaults. Unknown names are
/// passed through untouched.
#[must_use]
pub fn build_args(info: &ActionInfo, overrides: &[(String, String)]) -> Map<String, Value> {
    let mut args = default_args(info);
    for (name, value) in overrides {
        args.insert(name.clone(), Value::String(value.clone()));
    }
    args
}

/// Send an action to a run and wait for its outcome.
///
/// # Errors
///
/// Fails if the socket is closed or the reply does not arrive within the
/// registry's reply timeout.
pub async fn invoke_action(
    registry: &Registry,
    project_id: &str,
    run_id: &str,
    name: &str,
    args: Map<String, Value>,
) -> Result<ActionOutcome, ConnectionError> {
    let reply = registry.invoke_action(project_id, run_id, name, args).await?;
    let outcome = ActionOutcome::from_reply(&reply);
    if let ActionOutcome::Failed(error) = &outcome {
        tracing::warn!(%project_id, %run_id, action = %name, %error, "action failed");
    }
    Ok(outcome)
}
