use std::time::Duration;

use crate::bootstrap::BootstrapState;

/// Errors that can occur while bringing up a worker process.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fleetlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] fleetlink_frame::FrameError),

    /// The worker executable could not be started.
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The worker did not connect and initialize in time.
    #[error("worker did not become ready within {0:?}")]
    Timeout(Duration),

    /// The worker exited before the handshake finished.
    #[error("worker exited during startup: {0}")]
    WorkerExited(std::process::ExitStatus),

    /// The connection closed before the handshake finished.
    #[error("connection closed while {state}")]
    ConnectionClosed { state: BootstrapState },

    /// A service could not be registered.
    #[error("registry error: {0}")]
    Registry(#[from] fleetlink_rpc::RegistryError),

    /// I/O error while supervising the worker.
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
