use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, MalformedFrame, Result};
use crate::kind::MessageKind;

/// Frame header: kind (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One typed message. The payload is opaque to the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What the payload means.
    pub kind: MessageKind,
    /// The message payload.
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A message with no payload.
    pub fn empty(kind: MessageKind) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// The total wire size of this message (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a standalone frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_frame(self.kind, &self.payload, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬────────────┬────────────────┐
/// │ Kind (1B) │ Length     │ Payload        │
/// │           │ (4B LE)    │ (Length bytes) │
/// └───────────┴────────────┴────────────────┘
/// ```
pub fn encode_frame(kind: MessageKind, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(kind.as_u8());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. The kind byte is
/// validated as soon as it arrives so garbage is rejected without waiting for
/// a bogus length to fill up.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    if src.is_empty() {
        return Ok(None);
    }

    let kind = MessageKind::try_from(src[0])?;

    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Message { kind, payload }))
}

/// Decode exactly one complete frame.
///
/// This is the total inverse of [`Message::encode`]: any input that is not
/// exactly one well-formed frame is a [`MalformedFrame`].
pub fn decode_message(bytes: &[u8]) -> std::result::Result<Message, MalformedFrame> {
    if bytes.len() < HEADER_SIZE {
        return Err(MalformedFrame::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let kind = MessageKind::try_from(bytes[0])?;
    let payload_len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let total = HEADER_SIZE.saturating_add(payload_len);

    if bytes.len() < total {
        return Err(MalformedFrame::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(MalformedFrame::TrailingBytes(bytes.len() - total));
    }

    Ok(Message::new(
        kind,
        Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
    ))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
