use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fleetlink_transport::TcpEndpoint;
use tokio::net::ToSocketAddrs;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelRegistry};
use crate::error::Result;
use crate::server::IpcServer;

/// Accepts TCP connections and serves one shared channel table on each.
pub struct ChannelServer {
    endpoint: TcpEndpoint,
    channels: ChannelRegistry,
}

impl ChannelServer {
    /// Bind a listener.
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let endpoint = TcpEndpoint::bind(addr).await?;
        info!(addr = %endpoint.local_addr(), "channel server listening");
        Ok(Self {
            endpoint,
            channels: ChannelRegistry::new(),
        })
    }

    /// Register a channel on every current and future connection.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn Channel>) {
        self.channels.register(name, channel);
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> Result<IpcServer> {
        let stream = self.endpoint.accept().await?;
        debug!(peer = ?stream.peer_addr(), "accepted connection");
        IpcServer::new(stream, self.channels.clone())
    }

    /// Accept connections forever, serving each in its own task.
    ///
    /// A failed accept is logged and retried after a short pause.
    pub async fn run(self) {
        serve_accepted(|| self.accept()).await
    }
}

/// Pause after a failed accept, e.g. while out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

async fn serve_accepted<F, Fut>(mut accept: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<IpcServer>>,
{
    loop {
        match accept().await {
            Ok(server) => {
                tokio::spawn(async move {
                    if let Err(err) = server.run().await {
                        debug!(error = %err, "connection ended with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

impl std::fmt::Debug for ChannelServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelServer")
            .field("local_addr", &self.local_addr())
            .field("channels", &self.channels)
            .finish()
    }
}
