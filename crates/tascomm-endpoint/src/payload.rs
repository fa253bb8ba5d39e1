//! Typed payloads carried by the protocol's message kinds.
//!
//! Structured payloads are UTF-8 JSON. The hotkey press and the query
//! request/response headers are fixed binary.

use std::collections::BTreeMap;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tascomm_frame::MessageKind;

use crate::error::{EndpointError, Result};
use crate::hotkey::HotkeyId;

bitflags! {
    /// Playback state flags reported by the game.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TasStates: u8 {
        const ENABLE = 1;
        const FRAME_STEP = 1 << 1;
        const DISABLE = 1 << 2;
    }
}

impl Serialize for TasStates {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for TasStates {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(TasStates::from_bits_truncate(bits))
    }
}

/// The game's playback snapshot. Only the newest one matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSnapshot {
    /// Zero-based line the playback cursor is on, `-1` when not playing.
    pub current_line: i32,
    /// Progress text shown after the current line, e.g. `"3"` of a 10-frame input.
    pub current_line_suffix: String,
    pub current_frame_in_tas: u32,
    pub total_frames: u32,
    /// Line of the active save state, `-1` when there is none.
    pub save_state_line: i32,
    pub tas_states: TasStates,
    pub game_info: String,
    pub level_name: String,
    pub chapter_time: String,
}

/// Version pair the game announces during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct VersionInfo {
    pub game_version: String,
    /// Oldest studio version the game still talks to.
    pub min_studio_version: String,
}

impl VersionInfo {
    pub fn new(game_version: impl Into<String>, min_studio_version: impl Into<String>) -> Self {
        Self {
            game_version: game_version.into(),
            min_studio_version: min_studio_version.into(),
        }
    }
}

impl From<(String, String)> for VersionInfo {
    fn from((game_version, min_studio_version): (String, String)) -> Self {
        Self {
            game_version,
            min_studio_version,
        }
    }
}

impl From<VersionInfo> for (String, String) {
    fn from(info: VersionInfo) -> Self {
        (info.game_version, info.min_studio_version)
    }
}

/// Line index → replacement text.
pub type LineUpdates = BTreeMap<usize, String>;

/// A hotkey went down or came back up in the studio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyPressed {
    pub hotkey: HotkeyId,
    pub released: bool,
}

impl HotkeyPressed {
    pub(crate) fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.hotkey.as_u8(), u8::from(self.released)])
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        let [id, released] = payload else {
            return Err(invalid(
                MessageKind::SendHotkeyPressed,
                format!("expected 2 bytes, got {}", payload.len()),
            ));
        };
        let hotkey = HotkeyId::try_from(*id).map_err(|id| {
            invalid(
                MessageKind::SendHotkeyPressed,
                format!("unknown hotkey {id}"),
            )
        })?;
        let released = match *released {
            0 => false,
            1 => true,
            other => {
                return Err(invalid(
                    MessageKind::SendHotkeyPressed,
                    format!("released flag must be 0 or 1, got {other}"),
                ))
            }
        };
        Ok(Self { hotkey, released })
    }
}

/// Flip or set a named game setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, serde_json::Value)", into = "(String, serde_json::Value)")]
pub struct SettingToggle {
    pub name: String,
    /// `null` means toggle.
    pub value: serde_json::Value,
}

impl From<(String, serde_json::Value)> for SettingToggle {
    fn from((name, value): (String, serde_json::Value)) -> Self {
        Self { name, value }
    }
}

impl From<SettingToggle> for (String, serde_json::Value) {
    fn from(toggle: SettingToggle) -> Self {
        (toggle.name, toggle.value)
    }
}

/// Kinds of data the studio can ask the game for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GameDataType {
    ConsoleCommand = 0,
    ModInfo,
    ExactGameInfo,
    SettingValue,
    CompleteInfoCommand,
    ModUrl,
    CustomInfoTemplate,
}

impl GameDataType {
    pub const ALL: [GameDataType; 7] = [
        GameDataType::ConsoleCommand,
        GameDataType::ModInfo,
        GameDataType::ExactGameInfo,
        GameDataType::SettingValue,
        GameDataType::CompleteInfoCommand,
        GameDataType::ModUrl,
        GameDataType::CustomInfoTemplate,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Stable lowercase name, as accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            GameDataType::ConsoleCommand => "console-command",
            GameDataType::ModInfo => "mod-info",
            GameDataType::ExactGameInfo => "exact-game-info",
            GameDataType::SettingValue => "setting-value",
            GameDataType::CompleteInfoCommand => "complete-info-command",
            GameDataType::ModUrl => "mod-url",
            GameDataType::CustomInfoTemplate => "custom-info-template",
        }
    }
}

impl TryFrom<u8> for GameDataType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        GameDataType::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl std::str::FromStr for GameDataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        GameDataType::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown game data type: {s}"))
    }
}

impl std::fmt::Display for GameDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A studio query: `[kind: 1][token: 8 LE][argument JSON]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub kind: GameDataType,
    pub token: u64,
    /// `Null` when the query takes no argument.
    pub argument: serde_json::Value,
}

const QUERY_REQUEST_HEADER: usize = 1 + 8;
const QUERY_RESPONSE_HEADER: usize = 8;

impl QueryRequest {
    pub(crate) fn encode(&self) -> Bytes {
        let argument = if self.argument.is_null() {
            String::new()
        } else {
            self.argument.to_string()
        };
        let mut buf = BytesMut::with_capacity(QUERY_REQUEST_HEADER + argument.len());
        buf.put_u8(self.kind.as_u8());
        buf.put_u64_le(self.token);
        buf.put_slice(argument.as_bytes());
        buf.freeze()
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < QUERY_REQUEST_HEADER {
            return Err(invalid(
                MessageKind::GetData,
                format!("need {QUERY_REQUEST_HEADER} header bytes, got {}", payload.len()),
            ));
        }
        let mut buf = payload;
        let kind = GameDataType::try_from(buf.get_u8())
            .map_err(|k| invalid(MessageKind::GetData, format!("unknown data type {k}")))?;
        let token = buf.get_u64_le();
        let argument = if buf.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(buf).map_err(|err| invalid(MessageKind::GetData, err))?
        };
        Ok(Self {
            kind,
            token,
            argument,
        })
    }
}

/// The game's answer to a [`QueryRequest`]: `[token: 8 LE][result UTF-8]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub token: u64,
    pub result: String,
}

impl QueryResponse {
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(QUERY_RESPONSE_HEADER + self.result.len());
        buf.put_u64_le(self.token);
        buf.put_slice(self.result.as_bytes());
        buf.freeze()
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < QUERY_RESPONSE_HEADER {
            return Err(invalid(
                MessageKind::ReturnData,
                format!("need {QUERY_RESPONSE_HEADER} token bytes, got {}", payload.len()),
            ));
        }
        let mut buf = payload;
        let token = buf.get_u64_le();
        let result = decode_utf8(MessageKind::ReturnData, buf)?;
        Ok(Self { token, result })
    }
}

pub(crate) fn invalid(kind: MessageKind, detail: impl std::fmt::Display) -> EndpointError {
    EndpointError::violation(format!("invalid {kind} payload: {detail}"))
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    kind: MessageKind,
    payload: &[u8],
) -> Result<T> {
    serde_json::from_slice(payload).map_err(|err| invalid(kind, err))
}

pub(crate) fn decode_utf8(kind: MessageKind, payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec()).map_err(|err| invalid(kind, err))
}
