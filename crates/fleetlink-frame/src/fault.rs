//! Marshalled failures shared by the protocol layers.
//!
//! A remote handler can fail in two ways: with an error (name, message and a
//! stack of context lines), or by rejecting with an arbitrary value. Both
//! survive the trip across the wire and surface to the caller as a [`Fault`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An error reconstructed from the other side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    /// Generic error name used when nothing more specific is known.
    pub const GENERIC_NAME: &'static str = "Error";

    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Capture a local error, recording its source chain as the stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut lines = vec![format!("{}: {}", Self::GENERIC_NAME, err)];
        let mut source = err.source();
        while let Some(cause) = source {
            lines.push(format!("    caused by: {cause}"));
            source = cause.source();
        }
        Self {
            name: Self::GENERIC_NAME.to_string(),
            message: err.to_string(),
            stack: Some(lines.join("\n")),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// The stack split into lines, empty if none was recorded.
    pub fn stack_lines(&self) -> Vec<String> {
        self.stack
            .as_deref()
            .map(|stack| stack.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// A rejection produced by a remote handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    /// The handler failed with an error.
    #[error(transparent)]
    Error(#[from] RemoteError),
    /// The handler rejected with a value that is not an error.
    #[error("rejected with value {0}")]
    Value(Value),
}

impl Fault {
    /// A generic error fault with the given message.
    pub fn message(message: impl Into<String>) -> Self {
        Fault::Error(RemoteError::new(RemoteError::GENERIC_NAME, message))
    }

    /// Wrap any local error.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Fault::Error(RemoteError::from_error(err))
    }

    /// Convert a caught panic payload into an error fault.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "handler panicked".to_string()
        };
        Fault::Error(RemoteError::new("Panic", message))
    }

    /// The error message, if this fault carries an error.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Fault::Error(err) => Some(&err.message),
            Fault::Value(_) => None,
        }
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Fault::Error(RemoteError::new("SerializationError", err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn from_error_records_source_chain() {
        let err = Outer(std::io::Error::other("disk on fire"));
        let remote = RemoteError::from_error(&err);

        assert_eq!(remote.name, "Error");
        assert_eq!(remote.message, "outer failure");
        assert_eq!(
            remote.stack_lines(),
            vec![
                "Error: outer failure".to_string(),
                "    caused by: disk on fire".to_string()
            ]
        );
    }

    #[test]
    fn fault_messages() {
        let fault = Fault::message("boom");
        assert_eq!(fault.error_message(), Some("boom"));
        assert_eq!(fault.to_string(), "Error: boom");

        let value = Fault::Value(json!({"code": 42}));
        assert_eq!(value.error_message(), None);
        assert_eq!(value, Fault::Value(json!({"code": 42})));
    }

    #[test]
    fn panic_payloads_become_errors() {
        let fault = Fault::from_panic(Box::new("index out of bounds"));
        assert_eq!(fault.error_message(), Some("index out of bounds"));

        let fault = Fault::from_panic(Box::new(String::from("owned")));
        assert_eq!(fault.error_message(), Some("owned"));

        let fault = Fault::from_panic(Box::new(42u8));
        assert_eq!(fault.error_message(), Some("handler panicked"));
    }

    #[test]
    fn stack_is_optional_on_the_wire() {
        let remote: RemoteError =
            serde_json::from_value(json!({"name": "TypeError", "message": "bad"})).unwrap();
        assert_eq!(remote, RemoteError::new("TypeError", "bad"));
        assert!(remote.stack_lines().is_empty());
    }
}
