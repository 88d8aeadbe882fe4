use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use fleetlink_frame::{FramedTransport, MessageReader, MessageWriter};
use fleetlink_transport::TcpEndpoint;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ChannelError, Result};
use crate::protocol::{Request, Response};
use crate::server::lock;

/// Client side of one connection.
///
/// Calls issued before the server's `Initialize` arrives are held back and
/// sent in issue order once it does. Cloning is cheap; all clones share the
/// same connection, which closes when the last clone and the last pending
/// request are dropped.
#[derive(Clone)]
pub struct IpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    writer: MessageWriter,
    state: Mutex<ClientState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Idle,
    Closed,
}

struct ClientState {
    phase: Phase,
    next_id: u64,
    buffered: Vec<Request>,
    handlers: HashMap<u64, oneshot::Sender<Result<Value>>>,
}

impl IpcClient {
    /// Wrap a connected stream. Must be called from within a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (writer, reader) = FramedTransport::new(stream).into_parts();
        let inner = Arc::new(ClientInner {
            writer,
            state: Mutex::new(ClientState {
                phase: Phase::Uninitialized,
                next_id: 0,
                buffered: Vec::new(),
                handlers: HashMap::new(),
            }),
        });
        tokio::spawn(read_loop(Arc::downgrade(&inner), reader));
        Self { inner }
    }

    /// Connect to a [`ChannelServer`](crate::ChannelServer) over TCP.
    pub async fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let stream = TcpEndpoint::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// A handle for calling commands on the named channel.
    pub fn get_channel(&self, name: impl Into<String>) -> ChannelClient {
        ChannelClient {
            client: self.clone(),
            name: name.into(),
        }
    }

    /// True once the server's `Initialize` has been received.
    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.state).phase == Phase::Idle
    }

    /// True once the connection has gone away.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).phase == Phase::Closed
    }

    fn request(&self, channel_name: &str, name: &str, arg: Value) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        let mut state = lock(&self.inner.state);
        let id = state.next_id;
        state.next_id += 1;

        let request = Request::Common {
            id,
            channel_name: channel_name.to_string(),
            name: name.to_string(),
            arg,
        };

        match state.phase {
            // Dropping `tx` resolves the call as disconnected.
            Phase::Closed => debug!(id, "connection closed; call not sent"),
            Phase::Uninitialized => {
                debug!(id, channel = %channel_name, command = %name, "buffering request");
                state.handlers.insert(id, tx);
                state.buffered.push(request);
            }
            Phase::Idle => match self.inner.writer.send_json(&request) {
                Ok(()) => {
                    debug!(id, channel = %channel_name, command = %name, "sent request");
                    state.handlers.insert(id, tx);
                }
                Err(err) => {
                    let _ = tx.send(Err(err.into()));
                }
            },
        }

        PendingRequest {
            id,
            rx,
            client: self.clone(),
        }
    }
}

impl ClientInner {
    fn handle_response(&self, response: Response) {
        let mut state = lock(&self.state);

        let Some(id) = response.id() else {
            if state.phase != Phase::Uninitialized {
                debug!("ignoring repeated initialize");
                return;
            }
            state.phase = Phase::Idle;
            let buffered = std::mem::take(&mut state.buffered);
            debug!(count = buffered.len(), "server initialized; flushing buffered requests");
            for request in buffered {
                if let Err(err) = self.writer.send_json(&request) {
                    if let Some(tx) = state.handlers.remove(&request.id()) {
                        let _ = tx.send(Err(err.into()));
                    }
                }
            }
            return;
        };

        let Some(tx) = state.handlers.remove(&id) else {
            debug!(id, "response for unknown or cancelled request");
            return;
        };
        drop(state);

        if let Some(outcome) = response.into_outcome() {
            let _ = tx.send(outcome.map_err(ChannelError::Fault));
        }
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.phase = Phase::Closed;
        state.buffered.clear();
        if !state.handlers.is_empty() {
            debug!(count = state.handlers.len(), "failing pending requests");
        }
        // Dropping the senders resolves every waiter as disconnected.
        state.handlers.clear();
    }
}

async fn read_loop(inner: Weak<ClientInner>, mut reader: MessageReader) {
    while let Some(message) = reader.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping connection after undecodable frame");
                break;
            }
        };
        let Some(client) = inner.upgrade() else {
            return;
        };
        match message.parse::<Response>() {
            Ok(response) => client.handle_response(response),
            Err(err) => warn!(error = %err, "ignoring malformed response"),
        }
    }

    debug!("connection closed");
    if let Some(client) = inner.upgrade() {
        client.close();
    }
}

impl std::fmt::Debug for IpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("IpcClient")
            .field("phase", &state.phase)
            .field("pending", &state.handlers.len())
            .finish()
    }
}

/// Calls commands on one named channel.
#[derive(Clone, Debug)]
pub struct ChannelClient {
    client: IpcClient,
    name: String,
}

impl ChannelClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issue a call. The request is registered (and queued or sent) before
    /// this returns, so calls go out in the order they were made.
    pub fn call(&self, command: &str, arg: Value) -> PendingRequest {
        self.client.request(&self.name, command, arg)
    }
}

/// An issued call awaiting its response.
///
/// Resolves to the handler's value, to [`ChannelError::Fault`] if the handler
/// rejected, or to [`ChannelError::Disconnected`] if the connection closed
/// first. Dropping it does not cancel the call; use [`cancel`](Self::cancel).
#[must_use = "a pending request does nothing unless awaited or cancelled"]
pub struct PendingRequest {
    id: u64,
    rx: oneshot::Receiver<Result<Value>>,
    client: IpcClient,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Abandon the call.
    ///
    /// A call still buffered is never sent; one already sent is cancelled on
    /// the server, which sends no response for it.
    pub fn cancel(self) {
        let inner = &self.client.inner;
        let mut state = lock(&inner.state);
        if state.handlers.remove(&self.id).is_none() {
            return;
        }

        if let Some(pos) = state.buffered.iter().position(|r| r.id() == self.id) {
            state.buffered.remove(pos);
            debug!(id = self.id, "dropped buffered request");
            return;
        }

        if state.phase == Phase::Idle {
            if let Err(err) = inner.writer.send_json(&Request::Cancel { id: self.id }) {
                warn!(id = self.id, error = %err, "failed to send cancel");
            }
            debug!(id = self.id, "cancel sent");
        }
    }
}

impl Future for PendingRequest {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ChannelError::Disconnected)))
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use fleetlink_frame::{Fault, RemoteError};
    use fleetlink_transport::IpcStream;
    use serde_json::json;

    use super::*;
    use crate::channel::{unknown_command, Channel, ChannelRegistry};
    use crate::listener::ChannelServer;
    use crate::server::IpcServer;

    /// Test channel covering success, both rejection kinds, delays and hangs.
    #[derive(Default)]
    struct Probe {
        seen: Mutex<Vec<Value>>,
        hang_dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Channel for Probe {
        async fn call(&self, command: &str, arg: Value) -> std::result::Result<Value, Fault> {
            lock(&self.seen).push(arg.clone());
            match command {
                "echo" => Ok(arg),
                "fail" => Err(Fault::Error(RemoteError::new("Error", "boom"))),
                "reject" => Err(Fault::Value(json!({"code": 42}))),
                "sleep" => {
                    let ms = arg.as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(json!(ms))
                }
                "hang" => {
                    let _flag = DropFlag(Arc::clone(&self.hang_dropped));
                    std::future::pending::<()>().await;
                    Ok(Value::Null)
                }
                "panic" => panic!("handler exploded"),
                other => Err(unknown_command(other)),
            }
        }
    }

    fn serve(stream: IpcStream, probe: Arc<Probe>) -> tokio::task::JoinHandle<()> {
        let channels = ChannelRegistry::new();
        channels.register("probe", probe);
        let server = IpcServer::new(stream, channels).expect("server should start");
        tokio::spawn(async move {
            let _ = server.run().await;
        })
    }

    fn fault_of(result: Result<Value>) -> Fault {
        match result {
            Err(ChannelError::Fault(fault)) => fault,
            other => panic!("expected a remote fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calls_before_initialize_are_buffered_in_order() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let client = IpcClient::new(client_side);
        let channel = client.get_channel("probe");

        let first = channel.call("echo", json!("a"));
        let second = channel.call("echo", json!("b"));
        assert_eq!((first.id(), second.id()), (0, 1));
        assert!(!client.is_initialized());

        let probe = Arc::new(Probe::default());
        let _server = serve(server_side, Arc::clone(&probe));

        assert_eq!(first.await.expect("first call"), json!("a"));
        assert_eq!(second.await.expect("second call"), json!("b"));
        assert!(client.is_initialized());
        assert_eq!(*lock(&probe.seen), vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn responses_correlate_out_of_order() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let _server = serve(server_side, Arc::new(Probe::default()));
        let channel = IpcClient::new(client_side).get_channel("probe");

        let slow = channel.call("sleep", json!(80));
        let fast = channel.call("sleep", json!(0));
        assert_ne!(slow.id(), fast.id());

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.expect("slow call"), json!(80));
        assert_eq!(fast.expect("fast call"), json!(0));
    }

    #[tokio::test]
    async fn rejections_keep_their_shape() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let _server = serve(server_side, Arc::new(Probe::default()));
        let channel = IpcClient::new(client_side).get_channel("probe");

        let fault = fault_of(channel.call("fail", Value::Null).await);
        assert_eq!(fault.error_message(), Some("boom"));

        let fault = fault_of(channel.call("reject", Value::Null).await);
        assert_eq!(fault, Fault::Value(json!({"code": 42})));

        let fault = fault_of(channel.call("nope", Value::Null).await);
        assert_eq!(fault.error_message(), Some("unknown command: nope"));

        let fault = fault_of(channel.call("panic", Value::Null).await);
        assert_eq!(fault.error_message(), Some("handler exploded"));
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error_response() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let _server = serve(server_side, Arc::new(Probe::default()));
        let client = IpcClient::new(client_side);

        let fault = fault_of(client.get_channel("missing").call("echo", json!(1)).await);
        assert_eq!(fault.error_message(), Some("unknown channel: missing"));

        // The connection survives the failure.
        let ok = client.get_channel("probe").call("echo", json!(2)).await;
        assert_eq!(ok.expect("call after failure"), json!(2));
    }

    #[tokio::test]
    async fn cancel_aborts_the_handler() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let probe = Arc::new(Probe::default());
        let _server = serve(server_side, Arc::clone(&probe));
        let channel = IpcClient::new(client_side).get_channel("probe");

        // Wait for initialize so the hang request is actually sent.
        channel.call("echo", Value::Null).await.expect("warm-up call");

        let hanging = channel.call("hang", Value::Null);
        while lock(&probe.seen).len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        hanging.cancel();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !probe.hang_dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler should be aborted");

        assert_eq!(
            channel.call("echo", json!("after")).await.expect("call after cancel"),
            json!("after")
        );
    }

    #[tokio::test]
    async fn cancelling_a_buffered_call_never_sends_it() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let client = IpcClient::new(client_side);
        let channel = client.get_channel("probe");

        channel.call("echo", json!("dropped")).cancel();
        let kept = channel.call("echo", json!("kept"));

        let probe = Arc::new(Probe::default());
        let _server = serve(server_side, Arc::clone(&probe));

        assert_eq!(kept.await.expect("kept call"), json!("kept"));
        assert_eq!(*lock(&probe.seen), vec![json!("kept")]);
    }

    #[tokio::test]
    async fn connection_loss_fails_pending_calls() {
        let (client_side, server_side) = IpcStream::pair().expect("pair should open");
        let probe = Arc::new(Probe::default());
        let server = serve(server_side, Arc::clone(&probe));
        let client = IpcClient::new(client_side);
        let channel = client.get_channel("probe");

        let pending = channel.call("hang", Value::Null);
        while lock(&probe.seen).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("pending call should resolve");
        assert!(matches!(result, Err(ChannelError::Disconnected)));
        assert!(probe.hang_dropped.load(Ordering::SeqCst));
        assert!(client.is_closed());

        let late = channel.call("echo", Value::Null).await;
        assert!(matches!(late, Err(ChannelError::Disconnected)));
    }

    #[tokio::test]
    async fn listener_shares_channels_across_connections() {
        let server = ChannelServer::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        server.register_channel("probe", Arc::new(Probe::default()));
        let addr = server.local_addr();
        tokio::spawn(server.run());

        for n in 0..3 {
            let client = IpcClient::connect(addr).await.expect("client should connect");
            let value = client
                .get_channel("probe")
                .call("echo", json!({"n": n}))
                .await
                .expect("echo over tcp");
            assert_eq!(value, json!({"n": n}));
        }
    }
}
