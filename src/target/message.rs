//! Singer protocol messages read by the target.
//!
//! Lines are decoded through a flat wire struct rather than an internally
//! tagged enum, so numbers reach `u64` fields and record values directly
//! from the parser with their exact precision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of Singer input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    try_from = "WireMessage"
)]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        key_properties: Option<Vec<String>>,
    },
    Record {
        stream: String,
        record: Map<String, Value>,
        time_extracted: Option<String>,
        version: Option<u64>,
    },
    State {
        value: Value,
    },
    ActivateVersion {
        stream: String,
        version: u64,
    },
    /// Any message type this target does not act on
    Unknown,
}

/// Every field any message type may carry
#[derive(Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    stream: Option<String>,
    schema: Option<Value>,
    key_properties: Option<Vec<String>>,
    record: Option<Map<String, Value>>,
    time_extracted: Option<String>,
    version: Option<u64>,
    value: Option<Value>,
}

fn required<T>(field: Option<T>, kind: &str, name: &str) -> Result<T, String> {
    field.ok_or_else(|| format!("{} message is missing field `{}`", kind, name))
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = wire.kind.as_str();
        Ok(match kind {
            "SCHEMA" => Message::Schema {
                stream: required(wire.stream, kind, "stream")?,
                schema: required(wire.schema, kind, "schema")?,
                key_properties: wire.key_properties,
            },
            "RECORD" => Message::Record {
                stream: required(wire.stream, kind, "stream")?,
                record: required(wire.record, kind, "record")?,
                time_extracted: wire.time_extracted,
                version: wire.version,
            },
            "STATE" => Message::State {
                value: required(wire.value, kind, "value")?,
            },
            "ACTIVATE_VERSION" => Message::ActivateVersion {
                stream: required(wire.stream, kind, "stream")?,
                version: required(wire.version, kind, "version")?,
            },
            _ => Message::Unknown,
        })
    }
}

impl Message {
    /// Stream the message belongs to, if any
    pub fn stream(&self) -> Option<&str> {
        match self {
            Message::Schema { stream, .. }
            | Message::Record { stream, .. }
            | Message::ActivateVersion { stream, .. } => Some(stream),
            Message::State { .. } | Message::Unknown => None,
        }
    }
}

/// Parse one input line
pub fn parse_line(line: &str) -> Result<Message, serde_json::Error> {
    serde_json::from_str(line)
}
