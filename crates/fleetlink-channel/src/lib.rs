//! Named request/response channels over one framed connection.
//!
//! A server exposes any number of [`Channel`]s by name. A client issues calls
//! as `(channel, command, arg)` and gets each answer back by request id, so
//! many calls can be in flight at once and complete in any order.
//!
//! The server speaks first (`Initialize`); the client holds back its calls
//! until then.

pub mod channel;
pub mod client;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod server;

pub use channel::{unknown_channel, unknown_command, Channel, ChannelRegistry};
pub use client::{ChannelClient, IpcClient, PendingRequest};
pub use error::{ChannelError, Result};
pub use listener::ChannelServer;
pub use protocol::{ErrorData, Request, Response};
pub use server::IpcServer;
