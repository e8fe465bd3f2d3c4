//! Wire codec: typed [`Message`] <-> length-prefixed frame.
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────────────────┐
//! │ length (u16) │ kind (u8)│ payload (length - 1)     │
//! │  big-endian  │          │ bincode, fixint, BE      │
//! └──────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! `length` counts the kind byte and the payload, never itself. The
//! blocking transport uses [`encode`] / [`decode`] directly; the async
//! editor wraps a socket in `Framed<_, WireCodec>`.

use bincode::Options;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError};
use crate::message::{Message, MessageKind};

/// Size of the length prefix.
pub const LENGTH_SIZE: usize = 2;

/// Largest payload a frame can carry (`u16::MAX` minus the kind byte).
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - 1;

/// Largest complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = LENGTH_SIZE + 1 + MAX_PAYLOAD_SIZE;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(MAX_PAYLOAD_SIZE as u64)
}

// ── Payload level ────────────────────────────────────────────────

fn encode_payload<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, ProtocolError> {
    let size = bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .serialized_size(payload)
        .map_err(|e| malformed(kind, e))? as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    options().serialize(payload).map_err(|e| malformed(kind, e))
}

fn decode_payload<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> Result<T, ProtocolError> {
    options().deserialize(payload).map_err(|e| malformed(kind, e))
}

fn malformed(kind: MessageKind, e: bincode::Error) -> ProtocolError {
    ProtocolError::MalformedPayload {
        kind: kind.name(),
        reason: e.to_string(),
    }
}

/// Serialize only the payload of `message` (no length, no kind byte).
pub fn encode_message_payload(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let kind = message.kind();
    match message {
        Message::RunFrame(p) => encode_payload(kind, p),
        Message::FrameBuffer(p) => encode_payload(kind, p),
        Message::GameInfo(p) => encode_payload(kind, p),
        Message::Start(p) => encode_payload(kind, p),
        Message::Done(p) => encode_payload(kind, p),
        Message::SetProjectName(p) => encode_payload(kind, p),
        Message::SetCurrentFrame(p) => encode_payload(kind, p),
        Message::ModifyFrame(p) => encode_payload(kind, p),
        Message::IsPaused(p) => encode_payload(kind, p),
        Message::SetControllerNumber(p) => encode_payload(kind, p),
        Message::MemoryRegion(p) => encode_payload(kind, p),
    }
}

// ── Frame level ──────────────────────────────────────────────────

/// Encode `message` into a complete frame of `2 + 1 + payload_len` bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_message_payload(message)?;
    let mut frame = Vec::with_capacity(LENGTH_SIZE + 1 + payload.len());
    frame.extend_from_slice(&((payload.len() + 1) as u16).to_be_bytes());
    frame.push(message.kind() as u8);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode the payload of a frame whose kind byte is `kind`.
pub fn decode(kind: u8, payload: &[u8]) -> Result<Message, ProtocolError> {
    let kind = MessageKind::try_from(kind)?;
    let message = match kind {
        MessageKind::RunFrame => Message::RunFrame(decode_payload(kind, payload)?),
        MessageKind::FrameBuffer => Message::FrameBuffer(decode_payload(kind, payload)?),
        MessageKind::GameInfo => Message::GameInfo(decode_payload(kind, payload)?),
        MessageKind::Start => Message::Start(decode_payload(kind, payload)?),
        MessageKind::Done => Message::Done(decode_payload(kind, payload)?),
        MessageKind::SetProjectName => Message::SetProjectName(decode_payload(kind, payload)?),
        MessageKind::SetCurrentFrame => Message::SetCurrentFrame(decode_payload(kind, payload)?),
        MessageKind::ModifyFrame => Message::ModifyFrame(decode_payload(kind, payload)?),
        MessageKind::IsPaused => Message::IsPaused(decode_payload(kind, payload)?),
        MessageKind::SetControllerNumber => {
            Message::SetControllerNumber(decode_payload(kind, payload)?)
        }
        MessageKind::MemoryRegion => Message::MemoryRegion(decode_payload(kind, payload)?),
    };
    Ok(message)
}

/// Decode a frame body (`kind` byte followed by the payload).
pub fn decode_body(body: &[u8]) -> Result<Message, ProtocolError> {
    match body.split_first() {
        Some((&kind, payload)) => decode(kind, payload),
        None => Err(ProtocolError::EmptyFrame),
    }
}

// ── tokio_util codec ─────────────────────────────────────────────

/// Length-delimited framing for [`Message`]s.
///
/// A frame whose payload is malformed yields `Some(Err(..))` and the
/// stream stays aligned on the next frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireCodec;

impl WireCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for WireCodec {
    type Item = Result<Message, ProtocolError>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[0], src[1]]) as usize;
        if length == 0 {
            src.advance(LENGTH_SIZE);
            return Ok(Some(Err(ProtocolError::EmptyFrame)));
        }

        if src.len() < LENGTH_SIZE + length {
            src.reserve(LENGTH_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let body = src.split_to(length);
        Ok(Some(decode_body(&body)))
    }
}

impl Encoder<Message> for WireCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_message_payload(&item)?;
        dst.reserve(LENGTH_SIZE + 1 + payload.len());
        dst.put_u16((payload.len() + 1) as u16);
        dst.put_u8(item.kind() as u8);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
