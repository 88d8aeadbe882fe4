//! Peer data exchange over TCP.
//!
//! Every instance can serve its dataset on one channel. `push` sends the local
//! dataset to a peer, which merges it into its own; `pull` fetches the peer's
//! dataset.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use fleetlink_channel::{unknown_command, Channel, ChannelError, ChannelServer, IpcClient};
use fleetlink_frame::Fault;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::store::{merge_data, Data, StoreError};

pub const DEFAULT_PORT: u16 = 8220;
pub const DEFAULT_CHANNEL: &str = "exchange";
pub const PUSH_COMMAND: &str = "push";
pub const PULL_COMMAND: &str = "pull";

/// The dataset served to peers, backed by a file.
#[derive(Debug)]
pub struct DataStore {
    path: PathBuf,
    data: Mutex<Data>,
}

impl DataStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = Data::load(&path)?;
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn snapshot(&self) -> Data {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `incoming` and persist the result.
    pub fn merge_and_save(&self, incoming: Data) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        merge_data(&mut data, incoming);
        data.save(&self.path)
    }
}

/// Serves [`PUSH_COMMAND`] and [`PULL_COMMAND`] for a [`DataStore`].
pub struct ExchangeChannel {
    store: Arc<DataStore>,
}

impl ExchangeChannel {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Channel for ExchangeChannel {
    async fn call(&self, command: &str, arg: Value) -> Result<Value, Fault> {
        match command {
            PUSH_COMMAND => {
                let incoming: Data = serde_json::from_value(arg)?;
                info!(
                    repos = incoming.repos.len(),
                    projects = incoming.projects.len(),
                    "received pushed data"
                );
                self.store
                    .merge_and_save(incoming)
                    .map_err(|err| Fault::from_error(&err))?;
                Ok(json!(true))
            }
            PULL_COMMAND => {
                debug!("serving pull");
                Ok(serde_json::to_value(self.store.snapshot())?)
            }
            other => Err(unknown_command(other)),
        }
    }
}

/// Bind the exchange server.
///
/// Returns `None` when the address is already in use; any other bind failure
/// is an error.
pub async fn open_server(
    addr: &str,
    store: Arc<DataStore>,
) -> Result<Option<ChannelServer>, ChannelError> {
    match ChannelServer::bind(addr).await {
        Ok(server) => {
            server.register_channel(DEFAULT_CHANNEL, Arc::new(ExchangeChannel::new(store)));
            info!(addr = %server.local_addr(), "exchange server listening");
            Ok(Some(server))
        }
        Err(ChannelError::Transport(err)) if err.is_addr_in_use() => {
            warn!(addr, "address is already in use; no exchange server started");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Socket address of a peer. A `host:port` url keeps its port.
pub fn peer_address(url: &str, default_port: u16) -> String {
    if url.parse::<std::net::SocketAddr>().is_ok() {
        return url.to_string();
    }
    match url.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            url.to_string()
        }
        _ if url.contains(':') => format!("[{url}]:{default_port}"),
        _ => format!("{url}:{default_port}"),
    }
}

/// Send `data` to the peer at `addr`. Returns the peer's verdict.
pub async fn push(addr: &str, data: &Data) -> Result<bool, ChannelError> {
    info!(addr, "pushing data");
    let client = IpcClient::connect(addr).await?;
    let arg = serde_json::to_value(data)
        .map_err(|err| ChannelError::Protocol(format!("failed to encode data: {err}")))?;
    let reply = client
        .get_channel(DEFAULT_CHANNEL)
        .call(PUSH_COMMAND, arg)
        .await?;
    Ok(reply.as_bool().unwrap_or(false))
}

/// Fetch the dataset of the peer at `addr`.
pub async fn pull(addr: &str) -> Result<Data, ChannelError> {
    info!(addr, "pulling data");
    let client = IpcClient::connect(addr).await?;
    let reply = client
        .get_channel(DEFAULT_CHANNEL)
        .call(PULL_COMMAND, Value::Null)
        .await?;
    serde_json::from_value(reply)
        .map_err(|err| ChannelError::Protocol(format!("unexpected pull reply: {err}")))
}

#[cfg(test)]
mod tests {
    use fleetlink_host::{Repository, RepositoryKind};

    use super::*;
    use crate::store::{Language, Project};

    fn sample(url: &str, project: &str) -> Data {
        let repository = Repository {
            kind: RepositoryKind::Git,
            url: url.to_string(),
        };
        Data {
            repos: vec![repository.clone()],
            projects: vec![Project {
                name: project.to_string(),
                repository,
                path: format!("/src/{project}"),
                language: Language::JavaScript,
            }],
        }
    }

    async fn serve(dir: &std::path::Path, data: Data) -> (String, Arc<DataStore>) {
        let path = dir.join("data.json");
        data.save(&path).expect("seed data should save");
        let store = Arc::new(DataStore::open(&path).expect("store should open"));
        let server = open_server("127.0.0.1:0", store.clone())
            .await
            .expect("bind should succeed")
            .expect("port should be free");
        let addr = server.local_addr().to_string();
        tokio::spawn(server.run());
        (addr, store)
    }

    #[tokio::test]
    async fn push_merges_and_persists_on_the_peer() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (addr, store) = serve(dir.path(), sample("https://git.test/a", "billing")).await;

        let accepted = push(&addr, &sample("https://git.test/b", "search"))
            .await
            .expect("push should succeed");
        assert!(accepted);

        let merged = store.snapshot();
        assert_eq!(merged.repos.len(), 2);
        assert_eq!(merged.projects.len(), 2);
        let on_disk = Data::load(&dir.path().join("data.json")).expect("data should reload");
        assert_eq!(on_disk, merged);
    }

    #[tokio::test]
    async fn pull_returns_the_peer_dataset() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let served = sample("https://git.test/a", "billing");
        let (addr, _store) = serve(dir.path(), served.clone()).await;

        assert_eq!(pull(&addr).await.expect("pull should succeed"), served);
    }

    #[tokio::test]
    async fn malformed_push_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (addr, store) = serve(dir.path(), Data::default()).await;

        let client = IpcClient::connect(addr.as_str()).await.expect("connect");
        let err = client
            .get_channel(DEFAULT_CHANNEL)
            .call(PUSH_COMMAND, json!({"repos": "nope"}))
            .await
            .unwrap_err();
        assert!(err.fault().is_some());
        assert_eq!(store.snapshot(), Data::default());

        let err = client
            .get_channel(DEFAULT_CHANNEL)
            .call("sync", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(
            err.fault().and_then(Fault::error_message),
            Some("unknown command: sync")
        );
    }

    #[tokio::test]
    async fn address_in_use_is_not_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = taken.local_addr().expect("local addr").to_string();
        let store = Arc::new(DataStore {
            path: PathBuf::from("unused.json"),
            data: Mutex::new(Data::default()),
        });

        let server = open_server(&addr, store).await.expect("in-use is not an error");
        assert!(server.is_none());
    }

    #[test]
    fn peer_address_keeps_explicit_port() {
        assert_eq!(peer_address("10.0.0.7", DEFAULT_PORT), "10.0.0.7:8220");
        assert_eq!(peer_address("lab.local:9000", DEFAULT_PORT), "lab.local:9000");
        assert_eq!(peer_address("lab.local", 9100), "lab.local:9100");
        assert_eq!(peer_address("::1", DEFAULT_PORT), "[::1]:8220");
        assert_eq!(peer_address("[::1]:9000", DEFAULT_PORT), "[::1]:9000");
    }
}
