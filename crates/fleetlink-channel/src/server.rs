use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fleetlink_frame::{Fault, FramedTransport, MessageReader, MessageWriter};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::channel::{unknown_channel, Channel, ChannelRegistry};
use crate::error::Result;
use crate::protocol::{Request, Response};

type ActiveRequests = Arc<Mutex<HashMap<u64, AbortHandle>>>;

/// Server side of one connection.
///
/// Announces itself with `Initialize` as soon as it is created, then answers
/// requests once [`run`](Self::run) is polled. Each request runs in its own
/// task; dropping the server aborts every request still in flight.
pub struct IpcServer {
    channels: ChannelRegistry,
    writer: MessageWriter,
    reader: MessageReader,
    active: ActiveRequests,
}

impl IpcServer {
    /// Wrap a connected stream and send `Initialize`.
    pub fn new<S>(stream: S, channels: ChannelRegistry) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (writer, reader) = FramedTransport::new(stream).into_parts();
        writer.send_json(&Response::Initialize)?;
        Ok(Self {
            channels,
            writer,
            reader,
            active: Arc::default(),
        })
    }

    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn Channel>) {
        self.channels.register(name, channel);
    }

    /// Number of requests currently being handled.
    pub fn active_requests(&self) -> usize {
        lock(&self.active).len()
    }

    /// Serve requests until the peer closes the connection.
    ///
    /// Requests still running when the connection ends are aborted.
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.reader.recv().await {
            let request = match message?.parse::<Request>() {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "ignoring malformed request");
                    continue;
                }
            };
            match request {
                Request::Common {
                    id,
                    channel_name,
                    name,
                    arg,
                } => self.handle_common(id, channel_name, name, arg),
                Request::Cancel { id } => self.handle_cancel(id),
            }
        }
        debug!("connection closed by peer");
        Ok(())
    }

    fn handle_common(&self, id: u64, channel_name: String, name: String, arg: Value) {
        debug!(id, channel = %channel_name, command = %name, "handling request");

        let channels = self.channels.clone();
        let writer = self.writer.clone();
        let active = Arc::clone(&self.active);

        // Held across spawn so a fast handler cannot remove its entry before
        // it is inserted.
        let mut entries = lock(&self.active);
        let task = tokio::spawn(async move {
            let outcome = match channels.get(&channel_name) {
                Some(channel) => AssertUnwindSafe(channel.call(&name, arg))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(Fault::from_panic(panic))),
                None => Err(unknown_channel(&channel_name)),
            };
            if let Err(err) = &outcome {
                debug!(id, error = %err, "request failed");
            }
            if let Err(err) = writer.send_json(&Response::from_outcome(id, outcome)) {
                warn!(id, error = %err, "failed to encode response");
            }
            lock(&active).remove(&id);
        });
        entries.insert(id, task.abort_handle());
    }

    fn handle_cancel(&self, id: u64) {
        if let Some(handle) = lock(&self.active).remove(&id) {
            handle.abort();
            debug!(id, "request cancelled");
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let aborted: Vec<AbortHandle> = lock(&self.active).drain().map(|(_, h)| h).collect();
        if !aborted.is_empty() {
            debug!(count = aborted.len(), "aborting in-flight requests");
        }
        for handle in aborted {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for IpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcServer")
            .field("channels", &self.channels)
            .field("active", &self.active_requests())
            .finish_non_exhaustive()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
