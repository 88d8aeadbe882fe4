//! Length-prefixed message framing over any async byte stream.
//!
//! Every message is framed with:
//! - A 1-byte flag: `1` when the body is JSON, `0` for raw UTF-8 text
//! - A 4-byte big-endian body length
//!
//! [`FramedTransport`] owns the stream: outgoing messages are queued and
//! coalesced into a single write per scheduling turn, incoming bytes are
//! decoded in order with partial frames held until complete.

pub mod codec;
pub mod error;
pub mod fault;
pub mod message;
pub mod transport;

pub use codec::{encode_message, MessageCodec, FLAG_JSON, FLAG_TEXT, HEADER_SIZE, MAX_RESERVE};
pub use error::{FrameError, Result};
pub use fault::{Fault, RemoteError};
pub use message::Message;
pub use transport::{
    FrameConfig, FramedTransport, MessageReader, MessageWriter, DEFAULT_BUFFER_CAPACITY,
};
