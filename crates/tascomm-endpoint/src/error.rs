use std::time::Duration;

use tascomm_frame::MessageKind;

/// Errors that can end an endpoint session.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Opening, reading or writing the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] tascomm_transport::TransportError),

    /// Frame-level error, including malformed frames.
    #[error("frame error: {0}")]
    Frame(#[from] tascomm_frame::FrameError),

    /// The peer sent a message that is not valid for the current state or role.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer asked for a fresh session (it restarted).
    #[error("peer reset the session ({0})")]
    ResetByPeer(MessageKind),

    /// A local caller asked for the session to be dropped.
    #[error("reset requested locally")]
    ResetRequested,

    /// The game requires a newer studio. Fatal for the whole session.
    #[error(
        "game {peer_version} requires studio {required} or newer (this studio is {local})"
    )]
    VersionIncompatible {
        peer_version: String,
        required: String,
        local: String,
    },

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The peer did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// JSON serialization error on an outbound payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint loop thread panicked.
    #[error("endpoint thread panicked")]
    ThreadPanicked,

    /// The endpoint was asked to stop.
    #[error("endpoint shut down")]
    Shutdown,
}

/// What the loop does after a session ends with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Tear down and reconnect.
    Reset,
    /// Tear down and stop for good, reporting the error.
    Fatal,
    /// Tear down and stop quietly.
    Stop,
}

impl EndpointError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        EndpointError::ProtocolViolation(message.into())
    }

    pub(crate) fn unexpected(kind: MessageKind, role: &str) -> Self {
        EndpointError::ProtocolViolation(format!("{role} endpoint does not accept {kind}"))
    }

    /// How the endpoint loop reacts to this error.
    pub fn disposition(&self) -> Disposition {
        match self {
            EndpointError::VersionIncompatible { .. } | EndpointError::ThreadPanicked => {
                Disposition::Fatal
            }
            EndpointError::Shutdown => Disposition::Stop,
            _ => Disposition::Reset,
        }
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_version_gate_is_fatal() {
        let fatal = EndpointError::VersionIncompatible {
            peer_version: "3.1.0".to_string(),
            required: "2.5".to_string(),
            local: "2.4.0".to_string(),
        };
        assert_eq!(fatal.disposition(), Disposition::Fatal);
        assert!(fatal.to_string().contains("requires studio 2.5"));

        for err in [
            EndpointError::violation("duplicate handshake"),
            EndpointError::ResetByPeer(MessageKind::Reset),
            EndpointError::ResetRequested,
            EndpointError::Disconnected("eof".to_string()),
            EndpointError::Timeout(Duration::from_secs(1)),
            EndpointError::Frame(tascomm_frame::FrameError::ConnectionClosed),
        ] {
            assert_eq!(err.disposition(), Disposition::Reset, "{err}");
        }

        assert_eq!(EndpointError::Shutdown.disposition(), Disposition::Stop);
    }

    #[test]
    fn unexpected_names_role_and_kind() {
        let err = EndpointError::unexpected(MessageKind::SendPath, "studio");
        assert_eq!(
            err.to_string(),
            "protocol violation: studio endpoint does not accept SendPath"
        );
    }
}
