//! Launching an isolated worker process and the services it shares with
//! the host.
//!
//! The host binds a fresh local socket, spawns the worker with the socket path
//! as its only argument and runs a short text handshake (`ready`, `ack`,
//! `initialized`) before both ends switch to RPC. After that each side
//! registers its service on a [`fleetlink_rpc::ServiceRegistry`] and calls the
//! other through a typed stub ([`WorkerProxy`] on the host, [`HostProxy`] in
//! the worker).

pub mod bootstrap;
pub mod error;
pub mod services;
pub mod worker;

pub use bootstrap::{
    start_worker, Bootstrap, BootstrapConfig, BootstrapState, WorkerHost, ACK,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_STARTUP_TIMEOUT, INITIALIZED, READY,
};
pub use error::{BootstrapError, Result};
pub use services::{
    emit_extension_log, host_operations, worker_operations, ExtensionLogLevel, HostCall,
    HostDispatch, HostOperations, HostProxy, OperationDescription, Repository, RepositoryKind,
    WorkerCall, WorkerDispatch, WorkerOperations, WorkerProxy, EXTENSION_LOG_PREFIX,
};
pub use worker::{run_worker, WorkerSession};
