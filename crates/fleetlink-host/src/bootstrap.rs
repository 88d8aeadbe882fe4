use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use fleetlink_frame::{FramedTransport, MessageReader, MessageWriter};
use fleetlink_rpc::{RemoteCom, ServiceRegistry, Side};
use fleetlink_transport::{generate_pipe_name, generate_pipe_name_in, IpcStream};
#[cfg(unix)]
use fleetlink_transport::UnixDomainSocket;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, Result};
use crate::services::{host_operations, worker_operations, HostDispatch, HostOperations, WorkerProxy};

/// Sent by the worker once it is connected.
pub const READY: &str = "ready";
/// Sent by the host in answer to [`READY`].
pub const ACK: &str = "ack";
/// Sent by the worker once its services are registered.
pub const INITIALIZED: &str = "initialized";

/// Default time the worker has to connect and finish the handshake.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a worker gets to exit on its own during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for launching a worker process.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Worker executable. It receives the socket path as its only argument.
    pub worker_program: PathBuf,
    /// How long the worker has to connect and send `initialized`.
    pub startup_timeout: Duration,
    /// How long [`WorkerHost::shutdown`] waits before killing the worker.
    pub shutdown_grace: Duration,
    /// Directory for the socket. Defaults to the system temp dir.
    pub socket_dir: Option<PathBuf>,
    /// Extra environment for the worker.
    pub env: Vec<(String, String)>,
}

impl BootstrapConfig {
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            ..Self::default()
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::from("fleetlink-worker"),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            socket_dir: None,
            env: Vec::new(),
        }
    }
}

/// Progress of a bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Listening,
    WaitingForConnection,
    WaitingForReady,
    WaitingForInitialized,
    Ready,
    Failed(String),
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Listening => f.write_str("listening"),
            BootstrapState::WaitingForConnection => f.write_str("waiting for connection"),
            BootstrapState::WaitingForReady => f.write_str("waiting for ready"),
            BootstrapState::WaitingForInitialized => f.write_str("waiting for initialized"),
            BootstrapState::Ready => f.write_str("ready"),
            BootstrapState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(unix)]
type Listener = UnixDomainSocket;
#[cfg(not(unix))]
type Listener = std::convert::Infallible;

#[cfg(unix)]
fn bind(pipe: &Path) -> Result<Listener> {
    Ok(UnixDomainSocket::bind(pipe)?)
}

#[cfg(not(unix))]
fn bind(pipe: &Path) -> Result<Listener> {
    Err(fleetlink_transport::TransportError::Bind {
        endpoint: pipe.display().to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "worker bootstrap requires Unix domain sockets",
        ),
    }
    .into())
}

#[cfg(unix)]
async fn accept(socket: &Listener) -> Result<IpcStream> {
    Ok(socket.accept().await?)
}

#[cfg(not(unix))]
async fn accept(socket: &Listener) -> Result<IpcStream> {
    match *socket {}
}

/// Host side of the worker handshake.
///
/// ```text
/// host                         worker
///  | listen, spawn(pipe)          |
///  | <----------- connect ------- |
///  | <----------- "ready" ------- |
///  | ------------ "ack" --------> |
///  | <-------- "initialized" ---- |
///  | ======== RPC traffic ======= |
/// ```
pub struct Bootstrap {
    config: BootstrapConfig,
    pipe: PathBuf,
    socket: Listener,
    child: Option<Child>,
    state: BootstrapState,
}

impl Bootstrap {
    /// Bind a fresh socket for the worker to connect to.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(config: BootstrapConfig) -> Result<Self> {
        let pipe = match &config.socket_dir {
            Some(dir) => generate_pipe_name_in(dir),
            None => generate_pipe_name(),
        };
        let socket = bind(&pipe)?;
        debug!(pipe = %pipe.display(), "bootstrap listening");
        Ok(Self {
            config,
            pipe,
            socket,
            child: None,
            state: BootstrapState::Listening,
        })
    }

    /// Path the worker must connect to.
    pub fn pipe_name(&self) -> &Path {
        &self.pipe
    }

    pub fn state(&self) -> &BootstrapState {
        &self.state
    }

    /// Start the configured worker executable with the pipe name as argument.
    pub fn spawn_worker(&mut self) -> Result<()> {
        let program = &self.config.worker_program;
        let child = Command::new(program)
            .arg(&self.pipe)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BootstrapError::Spawn {
                program: program.display().to_string(),
                source,
            })?;
        info!(pid = ?child.id(), program = %program.display(), "spawned worker");
        self.child = Some(child);
        self.transition(BootstrapState::WaitingForConnection);
        Ok(())
    }

    /// Complete the handshake and expose `host` to the worker.
    ///
    /// The worker must connect, send `ready` and send `initialized` within
    /// the startup timeout. The host service is registered before any
    /// inbound call is read. On failure the state becomes
    /// [`BootstrapState::Failed`] and a spawned worker is killed.
    pub async fn wait_ready<H>(&mut self, host: Arc<H>) -> Result<WorkerHost>
    where
        H: HostOperations + 'static,
    {
        match self.handshake().await {
            Ok((writer, reader)) => {
                let registry = ServiceRegistry::new(RemoteCom::paused(writer, reader), Side::Main);
                registry.set(&host_operations(), Arc::new(HostDispatch::new(host)))?;
                let worker: WorkerProxy = registry.get(&worker_operations());
                registry.remote().start();
                self.transition(BootstrapState::Ready);
                info!("worker ready");
                Ok(WorkerHost {
                    child: self.child.take(),
                    registry,
                    worker,
                    shutdown_grace: self.config.shutdown_grace,
                })
            }
            Err(err) => {
                self.transition(BootstrapState::Failed(err.to_string()));
                if let Some(mut child) = self.child.take() {
                    if let Err(kill_err) = child.kill().await {
                        warn!(error = %kill_err, "failed to kill worker");
                    }
                }
                Err(err)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(MessageWriter, MessageReader)> {
        if self.state == BootstrapState::Listening {
            self.transition(BootstrapState::WaitingForConnection);
        }
        let deadline = Instant::now() + self.config.startup_timeout;

        let stream = tokio::select! {
            accepted = accept(&self.socket) => accepted?,
            status = wait_child(self.child.as_mut()) => {
                return Err(BootstrapError::WorkerExited(status?));
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(BootstrapError::Timeout(self.config.startup_timeout));
            }
        };
        self.transition(BootstrapState::WaitingForReady);

        let (writer, mut reader) = FramedTransport::new(stream).into_parts();
        self.receive(&mut reader, READY, deadline).await?;
        writer.send(ACK)?;
        self.transition(BootstrapState::WaitingForInitialized);

        self.receive(&mut reader, INITIALIZED, deadline).await?;
        Ok((writer, reader))
    }

    /// Wait for `expected` while watching the worker and the deadline.
    async fn receive(
        &mut self,
        reader: &mut MessageReader,
        expected: &str,
        deadline: Instant,
    ) -> Result<()> {
        tokio::select! {
            received = expect_text(reader, expected, &self.state) => received,
            status = wait_child(self.child.as_mut()) => {
                Err(BootstrapError::WorkerExited(status?))
            }
            _ = tokio::time::sleep_until(deadline) => {
                Err(BootstrapError::Timeout(self.config.startup_timeout))
            }
        }
    }

    fn transition(&mut self, next: BootstrapState) {
        debug!(from = %self.state, to = %next, "bootstrap transition");
        self.state = next;
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("pipe", &self.pipe)
            .field("state", &self.state)
            .field("worker_pid", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

async fn expect_text(
    reader: &mut MessageReader,
    expected: &str,
    state: &BootstrapState,
) -> Result<()> {
    loop {
        match reader.recv().await {
            Some(Ok(message)) if message.is_text(expected) => return Ok(()),
            Some(Ok(message)) => {
                debug!(?message, expected, "ignoring message during bootstrap");
            }
            Some(Err(err)) => return Err(err.into()),
            None => {
                return Err(BootstrapError::ConnectionClosed {
                    state: state.clone(),
                })
            }
        }
    }
}

async fn wait_child(child: Option<&mut Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

/// A worker that completed the handshake.
pub struct WorkerHost {
    child: Option<Child>,
    registry: ServiceRegistry,
    worker: WorkerProxy,
    shutdown_grace: Duration,
}

impl WorkerHost {
    /// Stub for the worker's service.
    pub fn worker(&self) -> &WorkerProxy {
        &self.worker
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// OS process id of a spawned worker.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Close the connection and wait for the worker to exit.
    ///
    /// The worker is killed if it is still running after the grace period.
    /// Returns `None` when no worker process was spawned.
    pub async fn shutdown(self) -> Result<Option<ExitStatus>> {
        let WorkerHost {
            child,
            registry,
            worker,
            shutdown_grace,
        } = self;
        drop(worker);
        drop(registry);

        let Some(mut child) = child else {
            return Ok(None);
        };
        match tokio::time::timeout(shutdown_grace, child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => {
                warn!(grace = ?shutdown_grace, "worker did not exit; killing it");
                child.kill().await?;
                Ok(Some(child.wait().await?))
            }
        }
    }
}

impl fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHost")
            .field("worker_pid", &self.pid())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Listen, spawn the configured worker and wait until it is ready.
pub async fn start_worker<H>(config: BootstrapConfig, host: Arc<H>) -> Result<WorkerHost>
where
    H: HostOperations + 'static,
{
    let mut bootstrap = Bootstrap::listen(config)?;
    bootstrap.spawn_worker()?;
    bootstrap.wait_ready(host).await
}
