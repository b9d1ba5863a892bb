//! Length-prefixed framing
//!
//! Stream sockets have no message boundaries: one read may return half a
//! frame, several frames, or both. Every frame therefore starts with the
//! length of its body so the decoder can buffer until a whole frame is
//! available and leave any following bytes in place for the next call.
//!
//! ```text
//! +-----------------+---------+-----------------+----------------+---------+
//! | body len u32 BE | kind u8 | corr len u16 BE | correlation id | payload |
//! +-----------------+---------+-----------------+----------------+---------+
//! ```
//!
//! The declared body length is checked against the configured maximum before
//! any of the body is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::transport::message::{Message, MessageKind};
use crate::utils::{Error, Result};

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Kind byte plus correlation id length.
pub const BODY_HEADER_LEN: usize = 3;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        decode_frame(src, self.max_message_bytes)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match decode_frame(src, self.max_message_bytes)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(truncated_frame(src)),
        }
    }
}

/// The error for bytes left over when the stream ends mid-frame.
fn truncated_frame(src: &BytesMut) -> Error {
    if src.len() < LENGTH_PREFIX_LEN {
        return Error::Framing(format!(
            "truncated frame: {} of {LENGTH_PREFIX_LEN} length-prefix bytes",
            src.len()
        ));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
    let frame_len = LENGTH_PREFIX_LEN + u32::from_be_bytes(prefix) as usize;
    Error::Framing(format!(
        "truncated frame: {} of {frame_len} bytes",
        src.len()
    ))
}

impl Encoder<Message> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, self.max_message_bytes, dst)
    }
}

/// Encode one message into a standalone frame.
pub fn encode(message: &Message, max_message_bytes: usize) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_frame(message, max_message_bytes, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the frame for `message` to `dst`.
pub fn encode_frame(message: &Message, max_message_bytes: usize, dst: &mut BytesMut) -> Result<()> {
    let correlation = message.correlation_id.as_bytes();
    let correlation_len = u16::try_from(correlation.len()).map_err(|_| {
        Error::Framing(format!(
            "correlation id of {} bytes exceeds {}",
            correlation.len(),
            u16::MAX
        ))
    })?;

    let body_len = BODY_HEADER_LEN + correlation.len() + message.payload.len();
    if body_len > max_message_bytes {
        return Err(Error::Framing(format!(
            "frame body of {body_len} bytes exceeds maximum of {max_message_bytes}"
        )));
    }
    let declared = u32::try_from(body_len)
        .map_err(|_| Error::Framing(format!("frame body of {body_len} bytes is too large")))?;

    dst.reserve(LENGTH_PREFIX_LEN + body_len);
    dst.put_u32(declared);
    dst.put_u8(message.kind.into());
    dst.put_u16(correlation_len);
    dst.put_slice(correlation);
    dst.put_slice(&message.payload);
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// Returns `Ok(None)` when more bytes are needed; `src` is left untouched in
/// that case.
pub fn decode_frame(src: &mut BytesMut, max_message_bytes: usize) -> Result<Option<Message>> {
    if src.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
    let body_len = u32::from_be_bytes(prefix) as usize;

    if body_len > max_message_bytes {
        return Err(Error::Framing(format!(
            "declared frame body of {body_len} bytes exceeds maximum of {max_message_bytes}"
        )));
    }

    let frame_len = LENGTH_PREFIX_LEN + body_len;
    if src.len() < frame_len {
        src.reserve(frame_len - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_LEN);
    let body = src.split_to(body_len).freeze();
    parse_body(body).map(Some)
}

fn parse_body(mut body: Bytes) -> Result<Message> {
    if body.remaining() < BODY_HEADER_LEN {
        return Err(Error::Framing(format!(
            "frame body of {} bytes is shorter than its header",
            body.remaining()
        )));
    }

    let kind = MessageKind::try_from(body.get_u8())?;
    let correlation_len = body.get_u16() as usize;
    if body.remaining() < correlation_len {
        return Err(Error::Framing(format!(
            "correlation id length {correlation_len} runs past the frame body"
        )));
    }

    let correlation = body.split_to(correlation_len);
    let correlation_id = std::str::from_utf8(&correlation)
        .map_err(|e| Error::Framing(format!("correlation id is not UTF-8: {e}")))?
        .to_owned();

    Ok(Message {
        kind,
        correlation_id,
        payload: body,
    })
}
