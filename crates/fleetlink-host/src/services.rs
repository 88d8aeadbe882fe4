//! Service contracts between the host and its worker process.
//!
//! Each service has a side-tagged identifier with a static method list, a
//! trait for the implementing side, an operation enum decoded from
//! `(method, args)`, a [`Handler`] adapter and a typed stub for the calling
//! side.

use std::sync::Arc;

use async_trait::async_trait;
use fleetlink_frame::Fault;
use fleetlink_rpc::{arg, unknown_method, Handler, Proxy, RpcError, ServiceIdentifier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

const WORKER_OPERATIONS_METHODS: &[&str] = &["loadFile", "executeRegisteredOperation"];

const HOST_OPERATIONS_METHODS: &[&str] = &[
    "registerOperation",
    "logInfo",
    "logError",
    "logDebug",
    "lookupRepositoryForProject",
];

/// Prefix for log lines forwarded from extension code.
pub const EXTENSION_LOG_PREFIX: &str = "[extension]";

/// Identifier of the service the worker implements (`eWorkerOperations`).
pub fn worker_operations() -> ServiceIdentifier {
    ServiceIdentifier::remote("WorkerOperations", WORKER_OPERATIONS_METHODS)
}

/// Identifier of the service the host implements (`mHostOperations`).
pub fn host_operations() -> ServiceIdentifier {
    ServiceIdentifier::main("HostOperations", HOST_OPERATIONS_METHODS)
}

/// An operation an extension makes available to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescription {
    pub name: String,
    /// Names of the positional arguments the operation expects.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Version control system of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Git,
    Svn,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    #[serde(rename = "type")]
    pub kind: RepositoryKind,
    pub url: String,
}

/// Severity of a log line sent by extension code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionLogLevel {
    Info,
    Error,
    Debug,
}

impl ExtensionLogLevel {
    /// Host service method carrying this level.
    pub fn method(self) -> &'static str {
        match self {
            ExtensionLogLevel::Info => "logInfo",
            ExtensionLogLevel::Error => "logError",
            ExtensionLogLevel::Debug => "logDebug",
        }
    }

    fn from_method(method: &str) -> Option<Self> {
        match method {
            "logInfo" => Some(ExtensionLogLevel::Info),
            "logError" => Some(ExtensionLogLevel::Error),
            "logDebug" => Some(ExtensionLogLevel::Debug),
            _ => None,
        }
    }
}

/// Emit an extension log line through `tracing`.
pub fn emit_extension_log(level: ExtensionLogLevel, message: &str, extra: &[Value]) {
    let prefix = EXTENSION_LOG_PREFIX;
    if extra.is_empty() {
        match level {
            ExtensionLogLevel::Info => info!("{prefix} {message}"),
            ExtensionLogLevel::Error => error!("{prefix} {message}"),
            ExtensionLogLevel::Debug => debug!("{prefix} {message}"),
        }
        return;
    }
    let extra = Value::Array(extra.to_vec());
    match level {
        ExtensionLogLevel::Info => info!(%extra, "{prefix} {message}"),
        ExtensionLogLevel::Error => error!(%extra, "{prefix} {message}"),
        ExtensionLogLevel::Debug => debug!(%extra, "{prefix} {message}"),
    }
}

/// Operations the worker process performs on behalf of the host.
#[async_trait]
pub trait WorkerOperations: Send + Sync {
    /// Load an extension file and register its operations with the host.
    async fn load_file(&self, path: String) -> Result<(), Fault>;

    /// Run an operation previously registered by a loaded extension.
    async fn execute_registered_operation(
        &self,
        name: String,
        args: Vec<String>,
    ) -> Result<Value, Fault>;
}

/// Decoded call on the worker service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCall {
    LoadFile { path: String },
    ExecuteRegisteredOperation { name: String, args: Vec<String> },
}

impl WorkerCall {
    pub fn decode(method: &str, args: &[Value]) -> Result<Self, Fault> {
        Ok(match method {
            "loadFile" => WorkerCall::LoadFile {
                path: arg(args, 0)?,
            },
            "executeRegisteredOperation" => WorkerCall::ExecuteRegisteredOperation {
                name: arg(args, 0)?,
                args: arg::<Option<Vec<String>>>(args, 1)?.unwrap_or_default(),
            },
            other => return Err(unknown_method(other)),
        })
    }
}

/// Exposes a [`WorkerOperations`] implementation to the host.
pub struct WorkerDispatch<T: ?Sized> {
    inner: Arc<T>,
}

impl<T: WorkerOperations + ?Sized> WorkerDispatch<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: WorkerOperations + ?Sized> Handler for WorkerDispatch<T> {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        match WorkerCall::decode(method, &args)? {
            WorkerCall::LoadFile { path } => {
                self.inner.load_file(path).await?;
                Ok(Value::Null)
            }
            WorkerCall::ExecuteRegisteredOperation { name, args } => {
                self.inner.execute_registered_operation(name, args).await
            }
        }
    }
}

/// Typed stub the host uses to call the worker.
#[derive(Clone, Debug)]
pub struct WorkerProxy {
    proxy: Proxy,
}

impl From<Proxy> for WorkerProxy {
    fn from(proxy: Proxy) -> Self {
        Self { proxy }
    }
}

impl WorkerProxy {
    pub async fn load_file(&self, path: &str) -> Result<(), RpcError> {
        self.proxy
            .invoke::<Value>("loadFile", vec![json!(path)])
            .await
            .map(drop)
    }

    pub async fn execute_registered_operation(
        &self,
        name: &str,
        args: &[String],
    ) -> Result<Value, RpcError> {
        self.proxy
            .invoke("executeRegisteredOperation", vec![json!(name), json!(args)])
            .await
    }
}

/// Operations the host offers to extension code running in the worker.
#[async_trait]
pub trait HostOperations: Send + Sync {
    /// Record an operation announced by a loaded extension.
    async fn register_operation(&self, description: OperationDescription) -> Result<(), Fault>;

    /// Log a line on behalf of extension code.
    fn log(&self, level: ExtensionLogLevel, message: &str, extra: &[Value]) {
        emit_extension_log(level, message, extra);
    }

    /// The repository of the named project, if known.
    async fn lookup_repository_for_project(
        &self,
        project: String,
    ) -> Result<Option<Repository>, Fault>;
}

/// Decoded call on the host service.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    RegisterOperation(OperationDescription),
    Log {
        level: ExtensionLogLevel,
        message: String,
        extra: Vec<Value>,
    },
    LookupRepositoryForProject(String),
}

impl HostCall {
    pub fn decode(method: &str, args: &[Value]) -> Result<Self, Fault> {
        if let Some(level) = ExtensionLogLevel::from_method(method) {
            let message = match args.first() {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let extra = args.iter().skip(1).cloned().collect();
            return Ok(HostCall::Log {
                level,
                message,
                extra,
            });
        }
        Ok(match method {
            "registerOperation" => HostCall::RegisterOperation(arg(args, 0)?),
            "lookupRepositoryForProject" => HostCall::LookupRepositoryForProject(arg(args, 0)?),
            other => return Err(unknown_method(other)),
        })
    }
}

/// Exposes a [`HostOperations`] implementation to the worker.
pub struct HostDispatch<T: ?Sized> {
    inner: Arc<T>,
}

impl<T: HostOperations + ?Sized> HostDispatch<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: HostOperations + ?Sized> Handler for HostDispatch<T> {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        match HostCall::decode(method, &args)? {
            HostCall::RegisterOperation(description) => {
                self.inner.register_operation(description).await?;
                Ok(Value::Null)
            }
            HostCall::Log {
                level,
                message,
                extra,
            } => {
                self.inner.log(level, &message, &extra);
                Ok(Value::Null)
            }
            HostCall::LookupRepositoryForProject(project) => {
                let repository = self.inner.lookup_repository_for_project(project).await?;
                Ok(serde_json::to_value(repository)?)
            }
        }
    }
}

/// Typed stub the worker uses to call the host.
#[derive(Clone, Debug)]
pub struct HostProxy {
    proxy: Proxy,
}

impl From<Proxy> for HostProxy {
    fn from(proxy: Proxy) -> Self {
        Self { proxy }
    }
}

impl HostProxy {
    pub async fn register_operation(
        &self,
        description: &OperationDescription,
    ) -> Result<(), RpcError> {
        let description = serde_json::to_value(description)?;
        self.proxy
            .invoke::<Value>("registerOperation", vec![description])
            .await
            .map(drop)
    }

    /// Send a log line to the host without waiting for it to be written.
    pub fn log(&self, level: ExtensionLogLevel, message: &str, extra: Vec<Value>) {
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(json!(message));
        args.extend(extra);
        if let Err(err) = self.proxy.call(level.method(), args) {
            debug!(error = %err, "extension log not forwarded");
        }
    }

    pub fn log_info(&self, message: &str) {
        self.log(ExtensionLogLevel::Info, message, Vec::new());
    }

    pub fn log_error(&self, message: &str) {
        self.log(ExtensionLogLevel::Error, message, Vec::new());
    }

    pub fn log_debug(&self, message: &str) {
        self.log(ExtensionLogLevel::Debug, message, Vec::new());
    }

    pub async fn lookup_repository_for_project(
        &self,
        project: &str,
    ) -> Result<Option<Repository>, RpcError> {
        self.proxy
            .invoke("lookupRepositoryForProject", vec![json!(project)])
            .await
    }
}
