//! Kind-tagged, length-prefixed message framing.
//!
//! Every message on the game/studio link is framed as:
//! - A 1-byte message kind from a closed enumeration
//! - A 4-byte little-endian payload length
//! - The payload bytes
//!
//! The codec is pure: no connection state, no knowledge of who sends what.
//! [`FrameReader`] and [`FrameWriter`] move whole frames over any stream.

pub mod codec;
pub mod error;
pub mod kind;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, decode_message, encode_frame, FrameConfig, Message, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use error::{FrameError, MalformedFrame, Result};
pub use kind::{MessageKind, Origin};
pub use reader::FrameReader;
pub use writer::FrameWriter;
