use std::path::Path;
use std::sync::Arc;

use fleetlink_frame::FramedTransport;
use fleetlink_rpc::{RemoteCom, ServiceRegistry, Side};
use fleetlink_transport::IpcStream;
#[cfg(unix)]
use fleetlink_transport::UnixDomainSocket;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapState, INITIALIZED, READY};
use crate::error::{BootstrapError, Result};
use crate::services::{host_operations, worker_operations, HostProxy, WorkerDispatch, WorkerOperations};

/// Worker end of an established host connection.
#[derive(Debug, Clone)]
pub struct WorkerSession {
    registry: ServiceRegistry,
    host: HostProxy,
}

impl WorkerSession {
    /// Stub for the host's service.
    pub fn host(&self) -> &HostProxy {
        &self.host
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Resolves once the host has gone away.
    pub async fn closed(&self) {
        self.registry.remote().closed().await;
    }
}

/// Connect to the host at `pipe` and serve the worker service.
///
/// `make_worker` receives the host stub so the implementation can call back
/// into the host. The returned session keeps the connection open.
pub async fn run_worker<W, F>(pipe: impl AsRef<Path>, make_worker: F) -> Result<WorkerSession>
where
    W: WorkerOperations + 'static,
    F: FnOnce(HostProxy) -> Arc<W>,
{
    let pipe = pipe.as_ref();
    let stream = connect(pipe).await?;
    debug!(pipe = %pipe.display(), "connected to host");

    let (writer, mut reader) = FramedTransport::new(stream).into_parts();
    writer.send(READY)?;
    match reader.recv().await {
        Some(Ok(message)) => debug!(?message, "host answered ready"),
        Some(Err(err)) => return Err(err.into()),
        None => {
            return Err(BootstrapError::ConnectionClosed {
                state: BootstrapState::WaitingForReady,
            })
        }
    }

    let registry = ServiceRegistry::new(
        RemoteCom::paused(writer.clone(), reader),
        Side::Remote,
    );
    let host: HostProxy = registry.get(&host_operations());
    let worker = make_worker(host.clone());
    registry.set(&worker_operations(), Arc::new(WorkerDispatch::new(worker)))?;
    registry.remote().start();

    writer.send(INITIALIZED)?;
    info!("worker initialized");
    Ok(WorkerSession { registry, host })
}

#[cfg(unix)]
async fn connect(pipe: &Path) -> Result<IpcStream> {
    Ok(UnixDomainSocket::connect(pipe).await?)
}

#[cfg(not(unix))]
async fn connect(pipe: &Path) -> Result<IpcStream> {
    Err(fleetlink_transport::TransportError::Connect {
        endpoint: pipe.display().to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "worker bootstrap requires Unix domain sockets",
        ),
    }
    .into())
}
