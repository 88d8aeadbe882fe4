//! Fleet management CLI.
//!
//! `fleetlink` keeps a small dataset of repositories and projects, syncs it
//! with peer instances over TCP ([`exchange`]) and runs extension operations
//! in an isolated `fleetlink-worker` process ([`extension_host`],
//! [`extension_worker`]).
//!
//! The library crates underneath:
//!
//! - [`transport`] - local socket and TCP endpoints
//! - [`frame`] - message framing
//! - [`channel`] - named request/response channels
//! - [`rpc`] - symmetric RPC and the service registry
//! - [`host`] - worker bootstrap and service contracts

pub mod config;
pub mod exchange;
pub mod exit;
pub mod extension_host;
pub mod extension_worker;
pub mod logging;
pub mod output;
pub mod store;

/// Re-export transport types.
pub mod transport {
    pub use fleetlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use fleetlink_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use fleetlink_channel::*;
}

/// Re-export RPC types.
pub mod rpc {
    pub use fleetlink_rpc::*;
}

/// Re-export worker bootstrap types.
pub mod host {
    pub use fleetlink_host::*;
}
