//! Local socket and TCP endpoints.
//!
//! This is the lowest layer of fleetlink. It knows nothing about messages:
//! it binds, accepts and connects, and hands out [`IpcStream`]s that the
//! framing layer turns into message streams.
//!
//! - Unix domain sockets for host/worker bootstrap
//! - TCP for peer-to-peer data exchange

pub mod error;
pub mod pipe;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use pipe::{generate_pipe_name, generate_pipe_name_in};
pub use stream::IpcStream;
pub use tcp::TcpEndpoint;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
