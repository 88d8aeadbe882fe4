use fleetlink_frame::Fault;

/// Errors that can occur on a channel connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fleetlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] fleetlink_frame::FrameError),

    /// The remote handler rejected the call.
    #[error("remote call failed: {0}")]
    Fault(#[from] Fault),

    /// The connection closed before a response arrived.
    #[error("connection closed before the call completed")]
    Disconnected,

    /// A message did not match the channel protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ChannelError {
    /// The remote fault, if the call was rejected by the other side.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ChannelError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
