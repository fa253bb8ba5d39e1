/// Reasons a byte sequence is not a well-formed frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedFrame {
    /// The kind byte is outside the message enumeration.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    /// Fewer bytes are available than the header or declared length require.
    #[error("truncated frame (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// Bytes remain after a complete frame where exactly one was expected.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bytes on the wire are not a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this is a read/write timeout rather than a broken stream.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
