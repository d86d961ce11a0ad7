//! Message model and JSON codec for the project websocket.
//!
//! This crate owns the wire representation shared by the sync engine and the
//! CLI. Every message is a JSON text frame tagged by `"event-type"`. The
//! envelope fields (`event-id`, `projectid`, `runid`, ...) are common to all
//! events, while the `payload` is decoded into a typed [`Event`] variant so
//! dispatch code can match exhaustively instead of probing properties.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EVENT_TYPE_KEY: &str = "event-type";
pub const EVENT_ID_KEY: &str = "event-id";
pub const PAYLOAD_KEY: &str = "payload";

/// Error returned by [`decode_message`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text frame is not valid JSON.
    #[error("failed to decode message json: {0}")]
    Json(#[from] serde_json::Error),
    /// The text frame is valid JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// The object carries no string `event-type` tag.
    #[error("message has no `event-type` tag")]
    MissingEventType,
    /// The payload does not match the shape expected for its event type.
    #[error("invalid `{event_type}` payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Event-type tag of a message. Doubles as the data type of a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Handshake,
    Log,
    Image,
    Scalar,
    Progress,
    Hardware,
    Action,
    /// Any tag this client does not model; carried through untouched.
    Other(String),
}

impl EventKind {
    /// Wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Handshake => "handshake",
            Self::Log => "log",
            Self::Image => "image",
            Self::Scalar => "scalar",
            Self::Progress => "progress",
            Self::Hardware => "hardware",
            Self::Action => "action",
            Self::Other(tag) => tag,
        }
    }

    /// Parse a wire tag. Unknown tags map to [`EventKind::Other`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "handshake" => Self::Handshake,
            "log" => Self::Log,
            "image" => Self::Image,
            "scalar" => Self::Scalar,
            "progress" => Self::Progress,
            "hardware" => Self::Hardware,
            "action" => Self::Action,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every message regardless of event type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Local request/reply correlation id. Never used to order data.
    #[serde(rename = "event-id", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sender role, `"web"` or `"cli"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub who: Option<String>,
    #[serde(rename = "projectid", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(rename = "runid", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Server timestamp, kept as the server formats it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    /// Storage row id assigned by the backend, when the event was persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

/// Payload of a `log` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPayload {
    #[serde(alias = "msg")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whom: Option<String>,
}

/// Payload of an `image` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePayload {
    #[serde(rename = "imageId", skip_serializing_if = "Option::is_none")]
    pub image_id: Option<i64>,
    pub metadata: Map<String, Value>,
}

impl ImagePayload {
    /// Series name stored in the image metadata.
    #[must_use]
    pub fn series(&self) -> Option<&str> {
        self.metadata.get("series").and_then(Value::as_str)
    }
}

/// Payload of a `scalar` event: one point of a named series.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Payload of a `progress` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    pub name: String,
    pub step: i64,
    /// Loop variable of the current iteration; any JSON value.
    pub current: Value,
    /// Expected step count, `None` when unknown.
    pub total: Option<i64>,
    /// Iterations per second, `-1` when not measured yet.
    pub rate: f64,
}

/// One CPU core in a hardware sample.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuInfo {
    pub id: Option<i64>,
    pub percentage: f64,
    /// `[current, min, max]` in MHz.
    pub frequency: Vec<f64>,
}

/// One GPU in a hardware sample.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GpuInfo {
    pub id: i64,
    pub name: String,
    pub load: f64,
    pub memory_util: f64,
    pub memory_total: f64,
    pub memory_free: f64,
    pub memory_used: f64,
    pub temperature: f64,
    pub driver: String,
}

/// Memory usage in a hardware sample.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamInfo {
    pub total: f64,
    pub available: f64,
    pub used: f64,
    pub free: f64,
}

/// Payload of a `hardware` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwarePayload {
    pub cpus: Vec<CpuInfo>,
    pub gpus: Vec<GpuInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<RamInfo>,
}

/// Payload of an `action` event.
///
/// Outbound invocations carry `name` and `args`; replies carry either
/// `error` or `result`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ActionPayload {
    /// Human-readable error text of a reply, if the action failed.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Typed event body of a message.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Handshake,
    Log(LogPayload),
    Image(ImagePayload),
    Scalar(ScalarPayload),
    Progress(ProgressPayload),
    Hardware(HardwarePayload),
    Action(ActionPayload),
    /// Unmodeled event type with its raw payload.
    Other { event_type: String, payload: Value },
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Handshake => EventKind::Handshake,
            Self::Log(_) => EventKind::Log,
            Self::Image(_) => EventKind::Image,
            Self::Scalar(_) => EventKind::Scalar,
            Self::Progress(_) => EventKind::Progress,
            Self::Hardware(_) => EventKind::Hardware,
            Self::Action(_) => EventKind::Action,
            Self::Other { event_type, .. } => EventKind::Other(event_type.clone()),
        }
    }

    /// Payload as JSON, `None` for events that carry no payload.
    #[must_use]
    pub fn payload_json(&self) -> Option<Value> {
        let value = match self {
            Self::Handshake => return None,
            Self::Log(p) => serde_json::to_value(p),
            Self::Image(p) => serde_json::to_value(p),
            Self::Scalar(p) => serde_json::to_value(p),
            Self::Progress(p) => serde_json::to_value(p),
            Self::Hardware(p) => serde_json::to_value(p),
            Self::Action(p) => serde_json::to_value(p),
            Self::Other { payload, .. } => return Some(payload.clone()),
        };
        // Plain derive structs with string keys always serialize.
        Some(value.unwrap_or(Value::Null))
    }

    fn decode(kind: EventKind, payload: Value) -> Result<Self, CodecError> {
        fn typed<T: serde::de::DeserializeOwned>(
            kind: &EventKind,
            payload: Value,
        ) -> Result<T, CodecError> {
            let payload = if payload.is_null() {
                Value::Object(Map::new())
            } else {
                payload
            };
            serde_json::from_value(payload).map_err(|source| CodecError::Payload {
                event_type: kind.as_str().to_owned(),
                source,
            })
        }

        Ok(match kind {
            EventKind::Handshake => Self::Handshake,
            EventKind::Log => Self::Log(typed(&kind, payload)?),
            EventKind::Image => Self::Image(typed(&kind, payload)?),
            EventKind::Scalar => Self::Scalar(typed(&kind, payload)?),
            EventKind::Progress => Self::Progress(typed(&kind, payload)?),
            EventKind::Hardware => Self::Hardware(typed(&kind, payload)?),
            EventKind::Action => Self::Action(typed(&kind, payload)?),
            EventKind::Other(event_type) => Self::Other { event_type, payload },
        })
    }
}

/// A single message on the project websocket.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub envelope: Envelope,
    pub event: Event,
}

impl Message {
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self { envelope: Envelope::default(), event }
    }

    /// Outbound handshake announcing this client as `who`.
    #[must_use]
    pub fn handshake(who: &str) -> Self {
        let mut message = Self::new(Event::Handshake);
        message.envelope.who = Some(who.to_owned());
        message
    }

    /// Outbound action invocation.
    #[must_use]
    pub fn action(name: &str, args: Map<String, Value>) -> Self {
        Self::new(Event::Action(ActionPayload {
            name: Some(name.to_owned()),
            args,
            ..ActionPayload::default()
        }))
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    #[must_use]
    pub fn event_id(&self) -> Option<i64> {
        self.envelope.event_id
    }

    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.envelope.run_id.as_deref()
    }

    /// Series tag: the envelope field first, then the payload's own tag.
    #[must_use]
    pub fn series(&self) -> Option<&str> {
        if let Some(series) = self.envelope.series.as_deref() {
            return Some(series);
        }
        match &self.event {
            Event::Log(p) => p.series.as_deref(),
            Event::Scalar(p) => p.series.as_deref(),
            Event::Progress(p) => p.series.as_deref(),
            Event::Image(p) => p.series(),
            Event::Other { payload, .. } => payload.get("series").and_then(Value::as_str),
            Event::Handshake | Event::Hardware(_) | Event::Action(_) => None,
        }
    }
}

/// Encode a message into a JSON text frame.
#[must_use]
pub fn encode_message(message: &Message) -> String {
    encode_value(message).to_string()
}

/// Encode a message into a JSON object value.
#[must_use]
pub fn encode_value(message: &Message) -> Value {
    let mut object = match serde_json::to_value(&message.envelope) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    object.insert(
        EVENT_TYPE_KEY.to_owned(),
        Value::String(message.kind().as_str().to_owned()),
    );
    if let Some(payload) = message.event.payload_json() {
        object.insert(PAYLOAD_KEY.to_owned(), payload);
    }
    Value::Object(object)
}

/// Decode a JSON text frame into a message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed text, [`CodecError::NotAnObject`]
/// and [`CodecError::MissingEventType`] for untagged values, and
/// [`CodecError::Payload`] when a known event carries a mismatched payload.
pub fn decode_message(text: &str) -> Result<Message, CodecError> {
    decode_value(serde_json::from_str(text)?)
}

/// Decode an already parsed JSON value into a message.
///
/// # Errors
///
/// Same as [`decode_message`], minus JSON syntax errors.
pub fn decode_value(value: Value) -> Result<Message, CodecError> {
    let Value::Object(mut object) = value else {
        return Err(CodecError::NotAnObject);
    };
    let kind = match object.remove(EVENT_TYPE_KEY) {
        Some(Value::String(tag)) => EventKind::from_tag(&tag),
        _ => return Err(CodecError::MissingEventType),
    };
    let payload = object.remove(PAYLOAD_KEY).unwrap_or(Value::Null);
    let envelope: Envelope = serde_json::from_value(Value::Object(object))?;
    let event = Event::decode(kind, payload)?;
    Ok(Message { envelope, event })
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
