//! Outbound and inbound message types
//!
//! Outbound frames are UTF-8 text or binary. Inbound text frames are decoded
//! as JSON when possible and otherwise kept as raw text; the string `type`
//! field of a JSON object is the dispatch topic.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Field carrying the topic discriminator in structured messages
pub const TOPIC_FIELD: &str = "type";

/// A frame submitted through `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Binary(Bytes),
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Serialize a value to a JSON text frame
    pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_string(value).map(Self::Text)
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Bytes> for OutboundMessage {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for OutboundMessage {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

/// A received data frame after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Text frame that decoded as JSON
    Json(Value),
    /// Text frame that is not valid JSON
    Text(String),
    /// Binary frame, passed through untouched
    Binary(Bytes),
}

impl InboundMessage {
    /// Decode a text frame, falling back to the raw text on parse failure
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text.to_owned()),
        }
    }

    pub fn from_binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Topic of a structured message (`type` field of a JSON object)
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Json(Value::Object(map)) => map.get(TOPIC_FIELD).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Decoded JSON, if the frame was structured
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Raw text for text frames that were not JSON
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Deserialize the JSON form into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}
