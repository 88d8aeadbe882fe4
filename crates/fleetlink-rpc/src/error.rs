use fleetlink_frame::Fault;

use crate::identifier::Side;

/// Errors surfaced to the caller of a remote method.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The remote implementation rejected the call.
    #[error("remote call failed: {0}")]
    Fault(#[from] Fault),

    /// The connection closed before a reply arrived.
    #[error("connection closed before the call completed")]
    Disconnected,

    /// The method is not declared on the service identifier.
    #[error("method {method} is not declared on service {service}")]
    UnknownMethod { service: String, method: String },

    /// A reply could not be decoded into the expected type.
    #[error("unexpected reply: {0}")]
    Decode(#[from] serde_json::Error),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] fleetlink_frame::FrameError),
}

impl RpcError {
    /// The remote fault, if the call was rejected by the other side.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            RpcError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors from registering implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The identifier belongs to the other side of the connection.
    #[error("mismatch in object registration: {id} is a {expected} service, registry is {actual}")]
    SideMismatch {
        id: String,
        expected: Side,
        actual: Side,
    },
}
