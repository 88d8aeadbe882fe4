//! RPC message shapes and error marshalling.
//!
//! Each logical message is a JSON object serialized to a string:
//!
//! ```text
//! {"req": 1, "rpcId": "eWorkerOperations", "method": "loadFile", "args": [...]}
//! {"seq": 1, "res": <value>}
//! {"seq": 1, "err": <marshalled fault>}
//! {"cancel": 1}
//! ```
//!
//! Many such strings travel together as one JSON array per frame.

use fleetlink_frame::{Fault, Message, RemoteError};
use serde_json::{json, Map, Value};

const IS_ERROR: &str = "$isError";

/// One logical RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// Invoke `method` on the object registered as `rpc_id`.
    Request {
        req: u64,
        rpc_id: String,
        method: String,
        args: Vec<Value>,
    },
    /// Outcome of the request numbered `seq`.
    Reply {
        seq: u64,
        outcome: Result<Value, Fault>,
    },
    /// Abandon the inbound request numbered `req`.
    Cancel { req: u64 },
}

impl RpcMessage {
    pub fn to_value(&self) -> Value {
        match self {
            RpcMessage::Request {
                req,
                rpc_id,
                method,
                args,
            } => json!({"req": req, "rpcId": rpc_id, "method": method, "args": args}),
            RpcMessage::Reply {
                seq,
                outcome: Ok(res),
            } => json!({"seq": seq, "res": res}),
            RpcMessage::Reply {
                seq,
                outcome: Err(fault),
            } => json!({"seq": seq, "err": marshal_fault(fault)}),
            RpcMessage::Cancel { req } => json!({"cancel": req}),
        }
    }

    /// Serialize to the string form carried inside a batch.
    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }

    /// Classify a decoded item.
    ///
    /// Returns `None` for anything that is not a request, reply or cancel.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };

        if let Some(seq) = map.get("seq").and_then(Value::as_u64) {
            let outcome = match map.remove("err") {
                Some(err) => Err(unmarshal_fault(err)),
                None => Ok(map.remove("res").unwrap_or(Value::Null)),
            };
            return Some(RpcMessage::Reply { seq, outcome });
        }

        if let Some(req) = map.get("cancel").and_then(Value::as_u64) {
            return Some(RpcMessage::Cancel { req });
        }

        let req = map.get("req").and_then(Value::as_u64)?;
        let rpc_id = take_string(&mut map, "rpcId");
        let method = take_string(&mut map, "method");
        let args = match map.remove("args") {
            Some(Value::Array(args)) => args,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        Some(RpcMessage::Request {
            req,
            rpc_id,
            method,
            args,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> String {
    match map.remove(key) {
        Some(Value::String(text)) => text,
        _ => String::new(),
    }
}

/// Pack outgoing message strings into one frame.
pub fn encode_batch(items: Vec<String>) -> Message {
    Message::Json(Value::Array(items.into_iter().map(Value::String).collect()))
}

/// Split one received frame into its logical messages, in order.
///
/// Items that are not valid JSON are dropped.
pub fn decode_batch(message: Message) -> Vec<Value> {
    let items = match message {
        Message::Json(Value::Array(items)) => items,
        Message::Json(other) => vec![other],
        Message::Text(text) => vec![Value::String(text)],
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!(error = %err, "dropping unparseable rpc item");
                    None
                }
            },
            other => Some(other),
        })
        .collect()
}

/// Marshal a fault: errors become `{$isError, name, message, stack}`, other
/// rejection values pass through unchanged.
pub fn marshal_fault(fault: &Fault) -> Value {
    match fault {
        Fault::Error(err) => json!({
            (IS_ERROR): true,
            "name": err.name,
            "message": err.message,
            "stack": err.stack,
        }),
        Fault::Value(value) => value.clone(),
    }
}

/// Reverse of [`marshal_fault`].
pub fn unmarshal_fault(value: Value) -> Fault {
    let is_error = value
        .get(IS_ERROR)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_error {
        return Fault::Value(value);
    }

    let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    Fault::Error(RemoteError {
        name: field("name").unwrap_or_else(|| RemoteError::GENERIC_NAME.to_string()),
        message: field("message").unwrap_or_default(),
        stack: field("stack"),
    })
}
