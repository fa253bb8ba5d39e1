//! Game and studio endpoints for the tascomm link.
//!
//! Each endpoint owns one loop thread that is the only reader and writer of
//! the transport. The thread runs the handshake, then strict one-frame-in /
//! one-frame-out turns, and on any failure tears the session down and
//! reconnects. Other threads talk to it through the handles returned by
//! [`GameEndpoint::spawn`] and [`StudioEndpoint::spawn`].

pub mod connector;
pub mod correlation;
pub mod endpoint;
pub mod error;
pub mod game;
pub mod handshake;
pub mod hotkey;
pub mod outbound;
pub mod payload;
pub mod protocol;
pub mod state;
pub mod studio;

pub use connector::Connector;
#[cfg(unix)]
pub use connector::{SocketAcceptor, SocketConnector};
pub use correlation::{CorrelationTable, QueryError, Ticket};
pub use endpoint::{EndpointConfig, EndpointHandle};
pub use error::{Disposition, EndpointError, Result};
pub use game::{GameEndpoint, GameHandle, GameHost, QueryResponder};
pub use handshake::{
    handshake_game, handshake_studio, is_version_compatible, GameHandshake, HandshakeConfig,
    StudioHandshake,
};
pub use hotkey::{BindingTable, HotkeyId, KeyCode};
pub use outbound::{CommandQueue, LatestSlot};
pub use payload::{
    GameDataType, HotkeyPressed, LineUpdates, PlaybackSnapshot, QueryRequest, QueryResponse,
    SettingToggle, TasStates, VersionInfo,
};
pub use protocol::Payload;
pub use state::ConnectionState;
pub use studio::{StudioEndpoint, StudioHandle, StudioHost};

/// Host that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHost;

impl GameHost for NoopHost {}

impl StudioHost for NoopHost {}
