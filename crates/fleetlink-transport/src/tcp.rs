use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// TCP listener used for peer-to-peer data exchange.
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind a TCP listener.
    ///
    /// Use [`TransportError::is_addr_in_use`] to tell an occupied port apart
    /// from other bind failures.
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let endpoint = addr.to_string();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                endpoint: endpoint.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Connect to a remote TCP listener.
    pub async fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<IpcStream> {
        let endpoint = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        debug!(%endpoint, "connected over tcp");
        Ok(IpcStream::from_tcp(stream))
    }

    /// The bound local address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
