//! Hotkey identifiers and the key-binding table the game shares with the studio.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Logical hotkeys understood by the game. Wire values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HotkeyId {
    Start = 0,
    Restart,
    FastForward,
    FastForwardComment,
    SlowForward,
    FrameAdvance,
    Pause,
    Hitboxes,
    TriggerHitboxes,
    Graphics,
    Camera,
    LockCamera,
    SaveState,
    ClearState,
    InfoHud,
    FreeCamera,
    CameraUp,
    CameraDown,
    CameraLeft,
    CameraRight,
    CameraZoomIn,
    CameraZoomOut,
}

impl HotkeyId {
    /// Every hotkey, in wire order.
    pub const ALL: [HotkeyId; 22] = [
        HotkeyId::Start,
        HotkeyId::Restart,
        HotkeyId::FastForward,
        HotkeyId::FastForwardComment,
        HotkeyId::SlowForward,
        HotkeyId::FrameAdvance,
        HotkeyId::Pause,
        HotkeyId::Hitboxes,
        HotkeyId::TriggerHitboxes,
        HotkeyId::Graphics,
        HotkeyId::Camera,
        HotkeyId::LockCamera,
        HotkeyId::SaveState,
        HotkeyId::ClearState,
        HotkeyId::InfoHud,
        HotkeyId::FreeCamera,
        HotkeyId::CameraUp,
        HotkeyId::CameraDown,
        HotkeyId::CameraLeft,
        HotkeyId::CameraRight,
        HotkeyId::CameraZoomIn,
        HotkeyId::CameraZoomOut,
    ];

    /// The wire byte for this hotkey.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for HotkeyId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        HotkeyId::ALL.get(value as usize).copied().ok_or(value)
    }
}

/// A physical key code as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

/// Hotkey → set of keys that must all be held at once.
///
/// The table is only ever replaced as a whole; there is no incremental update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingTable {
    bindings: BTreeMap<HotkeyId, BTreeSet<KeyCode>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, replacing any previous binding for `hotkey`.
    pub fn with(mut self, hotkey: HotkeyId, keys: impl IntoIterator<Item = KeyCode>) -> Self {
        self.insert(hotkey, keys);
        self
    }

    /// Bind `hotkey` to the given key chord.
    pub fn insert(&mut self, hotkey: HotkeyId, keys: impl IntoIterator<Item = KeyCode>) {
        self.bindings.insert(hotkey, keys.into_iter().collect());
    }

    /// Keys bound to `hotkey`.
    pub fn keys(&self, hotkey: HotkeyId) -> Option<&BTreeSet<KeyCode>> {
        self.bindings.get(&hotkey)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HotkeyId, &BTreeSet<KeyCode>)> {
        self.bindings.iter().map(|(id, keys)| (*id, keys))
    }

    /// Whether every key of a non-empty chord is currently held.
    pub fn is_pressed(&self, hotkey: HotkeyId, is_down: impl Fn(KeyCode) -> bool) -> bool {
        self.bindings
            .get(&hotkey)
            .is_some_and(|keys| !keys.is_empty() && keys.iter().all(|key| is_down(*key)))
    }

    /// Every hotkey whose chord is fully held.
    pub fn pressed(&self, is_down: impl Fn(KeyCode) -> bool) -> Vec<HotkeyId> {
        self.bindings
            .iter()
            .filter(|(_, keys)| !keys.is_empty() && keys.iter().all(|key| is_down(*key)))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Wire form: hotkey byte → ordered key list.
    pub(crate) fn to_wire(&self) -> BTreeMap<u8, Vec<KeyCode>> {
        self.bindings
            .iter()
            .map(|(id, keys)| (id.as_u8(), keys.iter().copied().collect()))
            .collect()
    }

    /// Build from the wire form, reporting hotkey bytes this build does not know.
    pub(crate) fn from_wire(wire: BTreeMap<u8, Vec<KeyCode>>) -> (Self, Vec<u8>) {
        let mut table = BindingTable::new();
        let mut unknown = Vec::new();
        for (id, keys) in wire {
            match HotkeyId::try_from(id) {
                Ok(hotkey) => table.insert(hotkey, keys),
                Err(id) => unknown.push(id),
            }
        }
        (table, unknown)
    }
}

impl FromIterator<(HotkeyId, BTreeSet<KeyCode>)> for BindingTable {
    fn from_iter<I: IntoIterator<Item = (HotkeyId, BTreeSet<KeyCode>)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}
