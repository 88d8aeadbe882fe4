use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace};

use crate::codec::{encode_message, MessageCodec};
use crate::error::Result;
use crate::message::Message;

/// Default initial capacity of the read and write buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Buffer sizing for a [`FramedTransport`].
///
/// Buffers grow as needed; these only set where they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    pub read_buffer_capacity: usize,
    pub write_buffer_capacity: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            read_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            write_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

type BoxedRead = Pin<Box<dyn AsyncRead + Send>>;

/// A byte stream turned into a bidirectional message stream.
///
/// Spawns one writer task on the current tokio runtime. The writer side is a
/// cheap, cloneable [`MessageWriter`]; the reader side is a single
/// [`MessageReader`].
pub struct FramedTransport {
    writer: MessageWriter,
    reader: MessageReader,
}

impl FramedTransport {
    /// Wrap a connected stream. Must be called from within a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(stream, FrameConfig::default())
    }

    pub fn with_config<S>(stream: S, config: FrameConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_half, rx, config.write_buffer_capacity));

        Self {
            writer: MessageWriter { tx },
            reader: MessageReader {
                inner: FramedRead::with_capacity(
                    Box::pin(read_half) as BoxedRead,
                    MessageCodec::new(),
                    config.read_buffer_capacity,
                ),
            },
        }
    }

    pub fn writer(&self) -> &MessageWriter {
        &self.writer
    }

    pub fn reader_mut(&mut self) -> &mut MessageReader {
        &mut self.reader
    }

    pub fn into_parts(self) -> (MessageWriter, MessageReader) {
        (self.writer, self.reader)
    }
}

/// Sending half of a [`FramedTransport`].
///
/// Messages are encoded immediately and queued; the writer task coalesces
/// everything queued in the same scheduling turn into a single write. Once the
/// connection is gone, further messages are dropped silently.
#[derive(Clone, Debug)]
pub struct MessageWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl MessageWriter {
    /// Queue a message for sending.
    ///
    /// Fails only if the message cannot be encoded.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_message(&message.into(), &mut buf)?;
        if self.tx.send(buf.freeze()).is_err() {
            debug!("connection closed; dropping outgoing message");
        }
        Ok(())
    }

    /// Queue a structured message.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send(Message::json(value)?)
    }

    /// True once the writer task has stopped (peer gone or write failed).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a [`FramedTransport`].
pub struct MessageReader {
    inner: FramedRead<BoxedRead, MessageCodec>,
}

impl MessageReader {
    /// Next decoded message, `None` on clean end of stream.
    pub async fn recv(&mut self) -> Option<Result<Message>> {
        self.inner.next().await
    }
}

impl Stream for MessageReader {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for MessageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader").finish_non_exhaustive()
    }
}

async fn write_loop<W>(mut sink: W, mut rx: mpsc::UnboundedReceiver<Bytes>, capacity: usize)
where
    W: AsyncWrite + Unpin,
{
    let mut batch = BytesMut::with_capacity(capacity);

    while let Some(first) = rx.recv().await {
        // Let the sender finish its turn so its burst lands in one write.
        tokio::task::yield_now().await;

        batch.extend_from_slice(&first);
        let mut frames = 1usize;
        while let Ok(next) = rx.try_recv() {
            batch.extend_from_slice(&next);
            frames += 1;
        }

        trace!(frames, bytes = batch.len(), "flushing coalesced frames");
        let written = async {
            sink.write_all(&batch).await?;
            sink.flush().await
        }
        .await;
        batch.clear();

        if let Err(err) = written {
            debug!(error = %err, "write failed; dropping further outgoing messages");
            rx.close();
            return;
        }
    }

    let _ = sink.shutdown().await;
}
