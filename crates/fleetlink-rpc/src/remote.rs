use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use fleetlink_frame::{Fault, FramedTransport, MessageReader, MessageWriter};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::message::{decode_batch, encode_batch, RpcMessage};
use crate::reply::{lazy_reply, LazyReply, ReplyResolver};

/// Receives inbound calls for a [`RemoteCom`].
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        rpc_id: &str,
        method: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, Fault>;
}

/// One end of a symmetric RPC connection.
///
/// Either side may call methods on objects registered by the other. Outgoing
/// messages queued in one scheduling turn leave as a single frame; inbound
/// messages are processed one per turn. Cloning is cheap and shares the
/// connection.
#[derive(Clone)]
pub struct RemoteCom {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    outgoing: mpsc::UnboundedSender<String>,
    state: Mutex<RemoteState>,
    closed: watch::Sender<bool>,
    started: watch::Sender<bool>,
}

struct RemoteState {
    next_id: u64,
    closed: bool,
    pending: HashMap<u64, ReplyResolver>,
    invoked: HashMap<u64, AbortHandle>,
    dispatcher: Option<Weak<dyn Dispatcher>>,
}

fn lock(state: &Mutex<RemoteState>) -> MutexGuard<'_, RemoteState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteCom {
    /// Wrap a connected stream. Must be called from within a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (writer, reader) = FramedTransport::new(stream).into_parts();
        Self::from_parts(writer, reader)
    }

    /// Take over an already framed connection, e.g. after a handshake.
    pub fn from_parts(writer: MessageWriter, reader: MessageReader) -> Self {
        let remote = Self::paused(writer, reader);
        remote.start();
        remote
    }

    /// Like [`from_parts`](Self::from_parts), but inbound messages stay
    /// unread until [`start`](Self::start) is called.
    ///
    /// Outgoing calls are sent right away. Use this to attach a dispatcher and
    /// register services before the other side can reach them.
    pub fn paused(writer: MessageWriter, reader: MessageReader) -> Self {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let inner = Arc::new(RemoteInner {
            outgoing,
            state: Mutex::new(RemoteState {
                next_id: 1,
                closed: false,
                pending: HashMap::new(),
                invoked: HashMap::new(),
                dispatcher: None,
            }),
            closed: watch::Sender::new(false),
            started: watch::Sender::new(false),
        });
        let started = inner.started.subscribe();
        tokio::spawn(batch_loop(writer, queue));
        tokio::spawn(receive_loop(Arc::downgrade(&inner), started, reader));
        Self { inner }
    }

    /// Begin processing inbound messages. Calling it again has no effect.
    pub fn start(&self) {
        self.inner.started.send_replace(true);
    }

    /// Install the handler for inbound calls, replacing any previous one.
    ///
    /// Only a weak reference is kept; the dispatcher must be owned elsewhere.
    pub fn set_dispatcher(&self, dispatcher: Weak<dyn Dispatcher>) {
        lock(&self.inner.state).dispatcher = Some(dispatcher);
    }

    /// Call `method` on the remote object `rpc_id`.
    ///
    /// The call is registered and queued before this returns.
    pub fn call_on_remote(&self, rpc_id: &str, method: &str, args: Vec<Value>) -> PendingReply {
        let (resolver, reply) = lazy_reply();
        let mut state = lock(&self.inner.state);
        let id = state.next_id;
        state.next_id += 1;

        if state.closed {
            debug!(id, rpc_id, method, "connection closed; call not sent");
        } else {
            trace!(id, rpc_id, method, "calling remote");
            state.pending.insert(id, resolver);
            self.inner.queue(RpcMessage::Request {
                req: id,
                rpc_id: rpc_id.to_string(),
                method: method.to_string(),
                args,
            });
        }

        PendingReply {
            id,
            reply,
            remote: Arc::downgrade(&self.inner),
        }
    }

    /// Number of outgoing calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// True once the connection has gone away.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Resolves once the connection has gone away.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl RemoteInner {
    fn queue(&self, message: RpcMessage) {
        if self.outgoing.send(message.to_json_string()).is_err() {
            debug!("batch writer stopped; dropping outgoing rpc message");
        }
    }

    fn handle_item(self: &Arc<Self>, item: Value) {
        match RpcMessage::from_value(item) {
            Some(RpcMessage::Reply { seq, outcome }) => {
                let resolver = lock(&self.state).pending.remove(&seq);
                match resolver {
                    Some(resolver) => {
                        resolver.settle(outcome.map_err(Into::into));
                    }
                    None => warn!(seq, "reply to unknown call"),
                }
            }
            Some(RpcMessage::Cancel { req }) => {
                if let Some(handle) = lock(&self.state).invoked.remove(&req) {
                    handle.abort();
                    debug!(req, "inbound call cancelled");
                }
            }
            Some(RpcMessage::Request {
                req,
                rpc_id,
                method,
                args,
            }) => self.invoke(req, rpc_id, method, args),
            None => trace!("ignoring non-rpc item"),
        }
    }

    fn invoke(self: &Arc<Self>, req: u64, rpc_id: String, method: String, args: Vec<Value>) {
        let mut state = lock(&self.state);
        let Some(dispatcher) = state.dispatcher.as_ref().and_then(Weak::upgrade) else {
            warn!(req, rpc_id = %rpc_id, method = %method, "inbound call before a handler was attached");
            self.queue(RpcMessage::Reply {
                seq: req,
                outcome: Err(Fault::message("no handler attached")),
            });
            return;
        };

        debug!(req, rpc_id = %rpc_id, method = %method, "inbound call");
        let remote = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(dispatcher.dispatch(&rpc_id, &method, args))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Fault::from_panic(panic)));
            if let Err(fault) = &outcome {
                debug!(req, rpc_id = %rpc_id, method = %method, error = %fault, "inbound call failed");
            }
            if let Some(remote) = remote.upgrade() {
                lock(&remote.state).invoked.remove(&req);
                remote.queue(RpcMessage::Reply { seq: req, outcome });
            }
        });
        state.invoked.insert(req, task.abort_handle());
    }

    fn close(&self) {
        let (pending, invoked) = {
            let mut state = lock(&self.state);
            state.closed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.invoked),
            )
        };
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing pending calls");
        }
        // Resolvers settle as disconnected on drop.
        drop(pending);
        for handle in invoked.into_values() {
            handle.abort();
        }
        self.closed.send_replace(true);
    }
}

async fn batch_loop(writer: MessageWriter, mut queue: mpsc::UnboundedReceiver<String>) {
    while let Some(first) = queue.recv().await {
        // Collect everything queued during the current turn.
        tokio::task::yield_now().await;

        let mut batch = vec![first];
        while let Ok(next) = queue.try_recv() {
            batch.push(next);
        }
        trace!(messages = batch.len(), "sending rpc batch");
        if let Err(err) = writer.send(encode_batch(batch)) {
            warn!(error = %err, "failed to encode rpc batch");
        }
    }
}

async fn receive_loop(
    remote: Weak<RemoteInner>,
    mut started: watch::Receiver<bool>,
    mut reader: MessageReader,
) {
    // Dropped before start: nobody is left to receive for.
    if started.wait_for(|started| *started).await.is_err() {
        return;
    }
    drop(started);

    while let Some(message) = reader.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping connection after undecodable frame");
                break;
            }
        };
        for item in decode_batch(message) {
            let Some(inner) = remote.upgrade() else {
                return;
            };
            inner.handle_item(item);
            drop(inner);
            // One item per turn.
            tokio::task::yield_now().await;
        }
    }

    debug!("rpc connection closed");
    if let Some(inner) = remote.upgrade() {
        inner.close();
    }
}

impl std::fmt::Debug for RemoteCom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("RemoteCom")
            .field("closed", &state.closed)
            .field("pending", &state.pending.len())
            .field("invoked", &state.invoked.len())
            .finish()
    }
}

/// An outgoing call awaiting its reply.
///
/// Dropping it does not cancel the call; the reply, when it comes, is
/// discarded. Use [`cancel`](Self::cancel) to abandon the call on both ends.
#[must_use = "a pending reply does nothing unless awaited or cancelled"]
pub struct PendingReply {
    id: u64,
    reply: LazyReply,
    remote: Weak<RemoteInner>,
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Abandon the call and ask the other side to stop working on it.
    pub fn cancel(self) {
        let Some(remote) = self.remote.upgrade() else {
            return;
        };
        let removed = lock(&remote.state).pending.remove(&self.id);
        if removed.is_some() {
            remote.queue(RpcMessage::Cancel { req: self.id });
            debug!(id = self.id, "call cancelled");
        }
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply).poll(cx)
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("reply", &self.reply)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fleetlink_frame::Message;
    use fleetlink_transport::IpcStream;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn calls_in_one_turn_share_a_frame() {
        let (left, right) = IpcStream::pair().expect("pair should open");
        let remote = RemoteCom::new(left);
        let (_writer, mut reader) = FramedTransport::new(right).into_parts();

        let first = remote.call_on_remote("eProbe", "a", vec![]);
        let second = remote.call_on_remote("eProbe", "b", vec![json!(1)]);
        let third = remote.call_on_remote("eProbe", "c", vec![]);
        assert_eq!((first.id(), second.id(), third.id()), (1, 2, 3));

        let frame = reader.recv().await.expect("frame").expect("decodable");
        let Message::Json(Value::Array(items)) = frame else {
            panic!("expected a json batch");
        };
        let methods: Vec<String> = items
            .iter()
            .map(|item| {
                let text = item.as_str().expect("batch items are strings");
                let value: Value = serde_json::from_str(text).expect("item is json");
                value["method"].as_str().expect("method").to_string()
            })
            .collect();
        assert_eq!(methods, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn early_reply_and_unknown_seq() {
        let (left, right) = IpcStream::pair().expect("pair should open");
        let remote = RemoteCom::new(left);
        let (writer, _reader) = FramedTransport::new(right).into_parts();

        let pending = remote.call_on_remote("eProbe", "a", vec![]);
        writer
            .send(encode_batch(vec![
                json!({"seq": 99, "res": "stray"}).to_string(),
                json!({"seq": pending.id(), "res": "answer"}).to_string(),
                json!({"unrelated": true}).to_string(),
            ]))
            .expect("encode");

        // The reply lands before anyone polls.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(remote.pending_calls(), 0);
        assert_eq!(pending.await.expect("answer"), json!("answer"));
    }

    #[tokio::test]
    async fn inbound_call_without_handler_is_rejected() {
        let (left, right) = IpcStream::pair().expect("pair should open");
        let _remote = RemoteCom::new(left);
        let (writer, mut reader) = FramedTransport::new(right).into_parts();

        writer
            .send(encode_batch(vec![RpcMessage::Request {
                req: 5,
                rpc_id: "mProbe".to_string(),
                method: "a".to_string(),
                args: vec![],
            }
            .to_json_string()]))
            .expect("encode");

        let frame = reader.recv().await.expect("frame").expect("decodable");
        let replies = decode_batch(frame);
        let reply = RpcMessage::from_value(replies[0].clone()).expect("reply");
        let RpcMessage::Reply { seq, outcome } = reply else {
            panic!("expected a reply");
        };
        assert_eq!(seq, 5);
        assert_eq!(
            outcome.unwrap_err().error_message(),
            Some("no handler attached")
        );
    }

    struct Upper;

    #[async_trait]
    impl Dispatcher for Upper {
        async fn dispatch(
            &self,
            _rpc_id: &str,
            method: &str,
            _args: Vec<Value>,
        ) -> std::result::Result<Value, Fault> {
            Ok(json!(method.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn paused_remote_holds_inbound_calls_until_started() {
        let (left, right) = IpcStream::pair().expect("pair should open");
        let (local_writer, local_reader) = FramedTransport::new(left).into_parts();
        let remote = RemoteCom::paused(local_writer, local_reader);
        let (writer, mut reader) = FramedTransport::new(right).into_parts();

        writer
            .send(encode_batch(vec![RpcMessage::Request {
                req: 7,
                rpc_id: "mProbe".to_string(),
                method: "shout".to_string(),
                args: vec![],
            }
            .to_json_string()]))
            .expect("encode");

        // Nothing is answered while paused.
        let early = tokio::time::timeout(Duration::from_millis(50), reader.recv()).await;
        assert!(early.is_err());

        let dispatcher: Arc<dyn Dispatcher> = Arc::new(Upper);
        remote.set_dispatcher(Arc::downgrade(&dispatcher));
        remote.start();

        let frame = reader.recv().await.expect("frame").expect("decodable");
        let reply = RpcMessage::from_value(decode_batch(frame)[0].clone()).expect("reply");
        let RpcMessage::Reply { seq, outcome } = reply else {
            panic!("expected a reply");
        };
        assert_eq!(seq, 7);
        assert_eq!(outcome.expect("dispatched"), json!("SHOUT"));
    }
}
