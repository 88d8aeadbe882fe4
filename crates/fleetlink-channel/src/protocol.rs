use fleetlink_frame::{Fault, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-to-server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Invoke `name` on the channel `channel_name`.
    #[serde(rename_all = "camelCase")]
    Common {
        id: u64,
        channel_name: String,
        name: String,
        #[serde(default)]
        arg: Value,
    },
    /// Abandon the request with the given id.
    Cancel { id: u64 },
}

impl Request {
    pub fn id(&self) -> u64 {
        match self {
            Request::Common { id, .. } | Request::Cancel { id } => *id,
        }
    }
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Sent once when the server side of a connection is ready.
    Initialize,
    Success {
        id: u64,
        #[serde(default)]
        data: Value,
    },
    /// The handler failed with an error.
    Error { id: u64, data: ErrorData },
    /// The handler rejected with a non-error value.
    ErrorObj {
        id: u64,
        #[serde(default)]
        data: Value,
    },
}

impl Response {
    /// Map a handler outcome onto the matching response kind.
    pub fn from_outcome(id: u64, outcome: std::result::Result<Value, Fault>) -> Self {
        match outcome {
            Ok(data) => Response::Success { id, data },
            Err(Fault::Error(err)) => Response::Error {
                id,
                data: ErrorData::from(err),
            },
            Err(Fault::Value(data)) => Response::ErrorObj { id, data },
        }
    }

    /// Request id this response answers, `None` for `Initialize`.
    pub fn id(&self) -> Option<u64> {
        match self {
            Response::Initialize => None,
            Response::Success { id, .. }
            | Response::Error { id, .. }
            | Response::ErrorObj { id, .. } => Some(*id),
        }
    }

    /// Convert a reply back into the caller-facing outcome.
    ///
    /// Returns `None` for `Initialize`.
    pub fn into_outcome(self) -> Option<std::result::Result<Value, Fault>> {
        match self {
            Response::Initialize => None,
            Response::Success { data, .. } => Some(Ok(data)),
            Response::Error { data, .. } => Some(Err(Fault::Error(data.into()))),
            Response::ErrorObj { data, .. } => Some(Err(Fault::Value(data))),
        }
    }
}

/// Error payload with the stack split into lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

impl From<RemoteError> for ErrorData {
    fn from(err: RemoteError) -> Self {
        let stack = err.stack.is_some().then(|| err.stack_lines());
        Self {
            name: err.name,
            message: err.message,
            stack,
        }
    }
}

impl From<ErrorData> for RemoteError {
    fn from(data: ErrorData) -> Self {
        Self {
            name: data.name,
            message: data.message,
            stack: data.stack.map(|lines| lines.join("\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_wire_shape() {
        let request = Request::Common {
            id: 3,
            channel_name: "data".to_string(),
            name: "pull".to_string(),
            arg: Value::Null,
        };
        assert_eq!(
            serde_json::to_value(&request).expect("request should serialize"),
            json!({"type": "common", "id": 3, "channelName": "data", "name": "pull", "arg": null})
        );
        assert_eq!(
            serde_json::to_value(Request::Cancel { id: 3 }).expect("cancel should serialize"),
            json!({"type": "cancel", "id": 3})
        );
    }

    #[test]
    fn initialize_has_no_id() {
        let response: Response =
            serde_json::from_value(json!({"type": "initialize"})).expect("should parse");
        assert_eq!(response, Response::Initialize);
        assert_eq!(response.id(), None);
        assert!(response.into_outcome().is_none());
    }

    #[test]
    fn error_outcome_splits_stack_into_lines() {
        let err = RemoteError::new("Error", "boom").with_stack("Error: boom\n    at handler");
        let response = Response::from_outcome(7, Err(Fault::Error(err.clone())));

        let wire = serde_json::to_value(&response).expect("response should serialize");
        assert_eq!(wire["type"], "error");
        assert_eq!(wire["data"]["stack"], json!(["Error: boom", "    at handler"]));

        let back: Response = serde_json::from_value(wire).expect("response should parse");
        assert_eq!(back.into_outcome(), Some(Err(Fault::Error(err))));
    }

    #[test]
    fn value_rejection_uses_error_obj() {
        let response = Response::from_outcome(1, Err(Fault::Value(json!({"code": 42}))));
        assert_eq!(
            response,
            Response::ErrorObj {
                id: 1,
                data: json!({"code": 42})
            }
        );
    }
}
