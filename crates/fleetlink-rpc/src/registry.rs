use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use fleetlink_frame::Fault;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{RegistryError, RpcError};
use crate::identifier::{ServiceIdentifier, Side};
use crate::remote::{Dispatcher, PendingReply, RemoteCom};

/// A local service implementation reachable from the other side.
///
/// Implementations decode `(method, args)` into their own operation type and
/// fail with [`unknown_method`] for names they do not know.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, Fault>;
}

/// Fault for an inbound call naming an unregistered service.
pub fn unknown_actor(rpc_id: &str) -> Fault {
    Fault::message(format!("unknown actor {rpc_id}"))
}

/// Fault for an inbound call naming a method the service does not have.
pub fn unknown_method(method: &str) -> Fault {
    Fault::message(format!("unknown method {method}"))
}

/// Decode positional argument `index`. Missing arguments decode from `null`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, Fault> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|err| {
        Fault::message(format!("invalid argument {index}: {err}"))
    })
}

/// Side-aware directory of services on one RPC connection.
///
/// Local implementations are [`set`](Self::set) under identifiers of this
/// registry's side; proxies to the other side's services come from
/// [`get`](Self::get). Cloning is cheap and shares the directory.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    side: Side,
    remote: RemoteCom,
    locals: RwLock<HashMap<String, Arc<dyn Handler>>>,
    proxies: Mutex<HashMap<String, Proxy>>,
}

impl ServiceRegistry {
    /// Create the registry and attach it as `remote`'s inbound dispatcher.
    pub fn new(remote: RemoteCom, side: Side) -> Self {
        let inner = Arc::new(RegistryInner {
            side,
            remote,
            locals: RwLock::new(HashMap::new()),
            proxies: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&inner);
        let dispatcher: Weak<dyn Dispatcher> = weak;
        inner.remote.set_dispatcher(dispatcher);
        Self { inner }
    }

    pub fn side(&self) -> Side {
        self.inner.side
    }

    pub fn remote(&self) -> &RemoteCom {
        &self.inner.remote
    }

    /// Register the local implementation of `identifier`.
    ///
    /// Fails without registering anything if `identifier` belongs to the
    /// other side.
    pub fn set(
        &self,
        identifier: &ServiceIdentifier,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        if identifier.side() != self.inner.side {
            return Err(RegistryError::SideMismatch {
                id: identifier.id().to_string(),
                expected: identifier.side(),
                actual: self.inner.side,
            });
        }
        debug!(service = %identifier, "registered local service");
        self.inner
            .locals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.id().to_string(), handler);
        Ok(())
    }

    /// True if a local implementation is registered under `identifier`.
    pub fn is_set(&self, identifier: &ServiceIdentifier) -> bool {
        self.inner
            .locals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier.id())
    }

    /// The cached proxy for `identifier`, built on first use.
    pub fn proxy(&self, identifier: &ServiceIdentifier) -> Proxy {
        let mut proxies = self
            .inner
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        proxies
            .entry(identifier.id().to_string())
            .or_insert_with(|| Proxy {
                identifier: identifier.clone(),
                remote: self.inner.remote.clone(),
            })
            .clone()
    }

    /// A typed stub for `identifier`.
    pub fn get<T: From<Proxy>>(&self, identifier: &ServiceIdentifier) -> T {
        T::from(self.proxy(identifier))
    }
}

#[async_trait]
impl Dispatcher for RegistryInner {
    async fn dispatch(&self, rpc_id: &str, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let handler = self
            .locals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rpc_id)
            .cloned();
        match handler {
            Some(handler) => handler.handle(method, args).await,
            None => Err(unknown_actor(rpc_id)),
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut locals: Vec<String> = self
            .inner
            .locals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        locals.sort();
        f.debug_struct("ServiceRegistry")
            .field("side", &self.inner.side)
            .field("locals", &locals)
            .finish()
    }
}

/// Forwards calls on one service identifier to the other side.
#[derive(Clone, Debug)]
pub struct Proxy {
    identifier: ServiceIdentifier,
    remote: RemoteCom,
}

impl Proxy {
    pub fn identifier(&self) -> &ServiceIdentifier {
        &self.identifier
    }

    /// Call a declared method.
    ///
    /// Undeclared methods fail locally without touching the connection.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<PendingReply, RpcError> {
        if !self.identifier.has_method(method) {
            return Err(RpcError::UnknownMethod {
                service: self.identifier.id().to_string(),
                method: method.to_string(),
            });
        }
        Ok(self.remote.call_on_remote(self.identifier.id(), method, args))
    }

    /// Call a declared method and decode its result.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, args)?.await?;
        Ok(serde_json::from_value(value)?)
    }
}
