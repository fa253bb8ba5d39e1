//! Tagged union over every message kind, with its payload decoded.

use bytes::Bytes;
use tascomm_frame::{Message, MessageKind};
use tracing::warn;

use crate::error::Result;
use crate::hotkey::{BindingTable, KeyCode};
use crate::payload::{
    decode_json, decode_utf8, HotkeyPressed, LineUpdates, PlaybackSnapshot, QueryRequest,
    QueryResponse, SettingToggle, VersionInfo,
};

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    EstablishConnection,
    Reset,
    Wait,
    State(PlaybackSnapshot),
    Bindings(BindingTable),
    UpdateLines(LineUpdates),
    /// Studio file path; empty when no file is open.
    Path(String),
    VersionInfo(VersionInfo),
    HotkeyPressed(HotkeyPressed),
    ToggleSetting(SettingToggle),
    Query(QueryRequest),
    QueryResult(QueryResponse),
    ConvertToLibTas(String),
}

impl Payload {
    /// The kind this payload travels as.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::EstablishConnection => MessageKind::EstablishConnection,
            Payload::Reset => MessageKind::Reset,
            Payload::Wait => MessageKind::Wait,
            Payload::State(_) => MessageKind::SendState,
            Payload::Bindings(_) => MessageKind::SendCurrentBindings,
            Payload::UpdateLines(_) => MessageKind::UpdateLines,
            Payload::Path(_) => MessageKind::SendPath,
            Payload::VersionInfo(_) => MessageKind::VersionInfo,
            Payload::HotkeyPressed(_) => MessageKind::SendHotkeyPressed,
            Payload::ToggleSetting(_) => MessageKind::ToggleGameSetting,
            Payload::Query(_) => MessageKind::GetData,
            Payload::QueryResult(_) => MessageKind::ReturnData,
            Payload::ConvertToLibTas(_) => MessageKind::ConvertToLibTas,
        }
    }

    /// Encode into a frame-level message.
    pub fn to_message(&self) -> Result<Message> {
        let payload: Bytes = match self {
            Payload::EstablishConnection | Payload::Reset | Payload::Wait => Bytes::new(),
            Payload::State(snapshot) => serde_json::to_vec(snapshot)?.into(),
            Payload::Bindings(table) => serde_json::to_vec(&table.to_wire())?.into(),
            Payload::UpdateLines(lines) => serde_json::to_vec(lines)?.into(),
            Payload::Path(path) | Payload::ConvertToLibTas(path) => {
                Bytes::copy_from_slice(path.as_bytes())
            }
            Payload::VersionInfo(info) => serde_json::to_vec(info)?.into(),
            Payload::HotkeyPressed(pressed) => pressed.encode(),
            Payload::ToggleSetting(toggle) => serde_json::to_vec(toggle)?.into(),
            Payload::Query(request) => request.encode(),
            Payload::QueryResult(response) => response.encode(),
        };
        Ok(Message::new(self.kind(), payload))
    }

    /// Decode a frame-level message. Any payload that does not parse for its
    /// kind is a protocol violation.
    pub fn from_message(message: &Message) -> Result<Payload> {
        let bytes = message.payload.as_ref();
        let kind = message.kind;
        let payload = match kind {
            MessageKind::EstablishConnection => Payload::EstablishConnection,
            MessageKind::Reset => Payload::Reset,
            MessageKind::Wait => Payload::Wait,
            MessageKind::SendState => Payload::State(decode_json(kind, bytes)?),
            MessageKind::SendCurrentBindings => {
                let wire: std::collections::BTreeMap<u8, Vec<KeyCode>> = decode_json(kind, bytes)?;
                let (table, unknown) = BindingTable::from_wire(wire);
                if !unknown.is_empty() {
                    warn!(?unknown, "skipping bindings for unknown hotkeys");
                }
                Payload::Bindings(table)
            }
            MessageKind::UpdateLines => Payload::UpdateLines(decode_json(kind, bytes)?),
            MessageKind::SendPath => Payload::Path(decode_utf8(kind, bytes)?),
            MessageKind::VersionInfo => Payload::VersionInfo(decode_json(kind, bytes)?),
            MessageKind::SendHotkeyPressed => Payload::HotkeyPressed(HotkeyPressed::decode(bytes)?),
            MessageKind::ToggleGameSetting => Payload::ToggleSetting(decode_json(kind, bytes)?),
            MessageKind::GetData => Payload::Query(QueryRequest::decode(bytes)?),
            MessageKind::ReturnData => Payload::QueryResult(QueryResponse::decode(bytes)?),
            MessageKind::ConvertToLibTas => Payload::ConvertToLibTas(decode_utf8(kind, bytes)?),
        };
        Ok(payload)
    }
}
