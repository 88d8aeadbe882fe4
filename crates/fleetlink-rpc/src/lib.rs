//! Symmetric RPC between two processes sharing one framed connection.
//!
//! [`RemoteCom`] numbers outgoing calls, batches messages per scheduling turn
//! and routes replies back to the call that issued them. On top of it,
//! [`ServiceRegistry`] maps side-tagged [`ServiceIdentifier`]s to local
//! [`Handler`]s and hands out [`Proxy`]s for the other side's services.

pub mod error;
pub mod identifier;
pub mod message;
pub mod registry;
pub mod remote;
pub mod reply;

pub use error::{RegistryError, Result, RpcError};
pub use identifier::{ServiceIdentifier, Side};
pub use message::RpcMessage;
pub use registry::{arg, unknown_actor, unknown_method, Handler, Proxy, ServiceRegistry};
pub use remote::{Dispatcher, PendingReply, RemoteCom};
pub use reply::{lazy_reply, LazyReply, ReplyResolver};
