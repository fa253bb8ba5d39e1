//! Message kinds.
//!
//! The enumeration is closed and its byte values are stable: both endpoints
//! must agree on it, there is no negotiation of the set itself.

use crate::error::MalformedFrame;

/// Which endpoint is allowed to send a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Sent only by the studio (editor) endpoint.
    Studio,
    /// Sent only by the game endpoint.
    Game,
    /// Sent by either side.
    Either,
}

/// The type tag carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
    /// Studio opens a session. Empty payload.
    EstablishConnection = 0x00,
    /// Sender is dropping the session. Empty payload.
    Reset = 0x01,
    /// Liveness frame, nothing to say this turn. Empty payload.
    Wait = 0x02,
    /// Playback snapshot.
    SendState = 0x03,
    /// Full hotkey binding table.
    SendCurrentBindings = 0x04,
    /// Replacement text for individual editor lines.
    UpdateLines = 0x05,
    /// Path of the file open in the studio.
    SendPath = 0x06,
    /// Game version and minimum compatible studio version.
    VersionInfo = 0x07,
    /// A hotkey was pressed or released in the studio.
    SendHotkeyPressed = 0x08,
    /// Change a game setting.
    ToggleGameSetting = 0x09,
    /// Data query request.
    GetData = 0x0A,
    /// Data query response.
    ReturnData = 0x0B,
    /// Export the given file as a libTAS movie.
    ConvertToLibTas = 0x0C,
}

impl MessageKind {
    /// Every kind, in wire order.
    pub const ALL: [MessageKind; 13] = [
        MessageKind::EstablishConnection,
        MessageKind::Reset,
        MessageKind::Wait,
        MessageKind::SendState,
        MessageKind::SendCurrentBindings,
        MessageKind::UpdateLines,
        MessageKind::SendPath,
        MessageKind::VersionInfo,
        MessageKind::SendHotkeyPressed,
        MessageKind::ToggleGameSetting,
        MessageKind::GetData,
        MessageKind::ReturnData,
        MessageKind::ConvertToLibTas,
    ];

    /// The wire byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Which endpoint may send this kind.
    pub fn origin(self) -> Origin {
        match self {
            MessageKind::Reset | MessageKind::Wait => Origin::Either,
            MessageKind::EstablishConnection
            | MessageKind::SendPath
            | MessageKind::SendHotkeyPressed
            | MessageKind::ToggleGameSetting
            | MessageKind::GetData
            | MessageKind::ConvertToLibTas => Origin::Studio,
            MessageKind::SendState
            | MessageKind::SendCurrentBindings
            | MessageKind::UpdateLines
            | MessageKind::VersionInfo
            | MessageKind::ReturnData => Origin::Game,
        }
    }

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::EstablishConnection => "EstablishConnection",
            MessageKind::Reset => "Reset",
            MessageKind::Wait => "Wait",
            MessageKind::SendState => "SendState",
            MessageKind::SendCurrentBindings => "SendCurrentBindings",
            MessageKind::UpdateLines => "UpdateLines",
            MessageKind::SendPath => "SendPath",
            MessageKind::VersionInfo => "VersionInfo",
            MessageKind::SendHotkeyPressed => "SendHotkeyPressed",
            MessageKind::ToggleGameSetting => "ToggleGameSetting",
            MessageKind::GetData => "GetData",
            MessageKind::ReturnData => "ReturnData",
            MessageKind::ConvertToLibTas => "ConvertToLibTas",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = MalformedFrame;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(MalformedFrame::UnknownKind(value))
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
