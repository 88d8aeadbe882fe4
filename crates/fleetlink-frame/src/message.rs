use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// One unit exchanged over a framed stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Raw string, sent as-is.
    Text(String),
    /// Structured value, serialized as JSON and flagged in the header.
    Json(Value),
}

impl Message {
    /// Build a structured message from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// The text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Json(_) => None,
        }
    }

    /// True if this is exactly the text message `expected`.
    pub fn is_text(&self, expected: &str) -> bool {
        self.as_text() == Some(expected)
    }

    /// Deserialize a structured message into `T`.
    ///
    /// Text messages are parsed as JSON, so a peer that sends pre-serialized
    /// strings can still be read.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Message::Json(value) => Ok(serde_json::from_value(value)?),
            Message::Text(text) => Ok(serde_json::from_str(&text)?),
        }
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::Text(value.to_string())
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::Text(value)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Json(value)
    }
}
