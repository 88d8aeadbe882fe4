use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::message::Message;

/// Frame header: flag (1) + body length (4, big-endian) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Header flag for a raw UTF-8 text body.
pub const FLAG_TEXT: u8 = 0;

/// Header flag for a JSON body.
pub const FLAG_JSON: u8 = 1;

/// Largest body allocation made up front from a header's declared length.
pub const MAX_RESERVE: usize = 64 * 1024;

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────┬──────────────────┐
/// │ Flag     │ Length       │ Body             │
/// │ (1B)     │ (4B BE)      │ (Length bytes)   │
/// │ 0 = text │              │ UTF-8            │
/// │ 1 = JSON │              │                  │
/// └──────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let (flag, body) = match message {
        Message::Text(text) => (FLAG_TEXT, std::borrow::Cow::Borrowed(text.as_bytes())),
        Message::Json(value) => (FLAG_JSON, std::borrow::Cow::Owned(serde_json::to_vec(value)?)),
    };

    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }

    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u8(flag);
    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Stateful decoder for the message wire format.
///
/// The header is parsed and consumed once; the decoder then waits until the
/// whole body is buffered. Lengths are trusted as sent, but at most
/// [`MAX_RESERVE`] bytes are allocated before the body actually arrives.
#[derive(Debug, Default)]
pub struct MessageCodec {
    state: DecodeState,
}

#[derive(Debug, Default, Clone, Copy)]
enum DecodeState {
    #[default]
    Head,
    Body {
        is_json: bool,
        len: usize,
    },
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the decoder has consumed a header and waits for its body.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, DecodeState::Body { .. })
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let (is_json, len) = match self.state {
            DecodeState::Head => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let is_json = src.get_u8() == FLAG_JSON;
                let len = src.get_u32() as usize;
                self.state = DecodeState::Body { is_json, len };
                src.reserve(len.saturating_sub(src.len()).min(MAX_RESERVE));
                (is_json, len)
            }
            DecodeState::Body { is_json, len } => (is_json, len),
        };

        if src.len() < len {
            return Ok(None);
        }

        let body = src.split_to(len);
        self.state = DecodeState::Head;

        if is_json {
            Ok(Some(Message::Json(serde_json::from_slice(&body)?)))
        } else {
            Ok(Some(Message::Text(String::from_utf8(body.to_vec())?)))
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        encode_message(&item, dst)
    }
}
