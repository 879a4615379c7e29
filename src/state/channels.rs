//! Visual states and the three input channels that compete for them
//!
//! Each channel holds the state it currently wants shown. The keys
//! channel additionally tracks which movement keys are held so a
//! release of one key does not drop to Idle while another is down.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Key identifiers that drive the keys channel
pub const MOVEMENT_KEYS: [&str; 4] = ["KeyW", "KeyA", "KeyS", "KeyD"];

/// Primary button
pub const MOUSE_PRIMARY: i64 = 0;
/// Side/forward button
pub const MOUSE_SIDE: i64 = 4;

/// Check whether a key identifier belongs to the movement set
pub fn is_movement_key(code: &str) -> bool {
    MOVEMENT_KEYS.contains(&code)
}

/// Check whether a mouse button is one the mouse channel reacts to
pub fn is_tracked_button(button: i64) -> bool {
    button == MOUSE_PRIMARY || button == MOUSE_SIDE
}

/// Every state the overlay can display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    /// Nothing is happening
    Idle,
    /// Voice above the talk threshold
    Talk,
    /// Voice above the scream threshold
    Scream,
    /// A movement key is held
    Wasd,
    /// A tracked mouse button was clicked
    Mouse,
}

impl VisualState {
    /// All states, in declaration order
    pub const ALL: [VisualState; 5] = [
        VisualState::Idle,
        VisualState::Talk,
        VisualState::Scream,
        VisualState::Wasd,
        VisualState::Mouse,
    ];

    /// Lowercase name used in config files and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualState::Idle => "idle",
            VisualState::Talk => "talk",
            VisualState::Scream => "scream",
            VisualState::Wasd => "wasd",
            VisualState::Mouse => "mouse",
        }
    }
}

impl std::str::FromStr for VisualState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VisualState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// A state name that is not one of [`VisualState::ALL`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state '{0}'")]
pub struct UnknownState(pub String);

impl Default for VisualState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for VisualState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The independent input sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Voice,
    Keys,
    Mouse,
}

impl Channel {
    /// Evaluation order used by the resolver; earlier wins ties
    pub const ORDER: [Channel; 3] = [Channel::Voice, Channel::Keys, Channel::Mouse];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Voice => write!(f, "voice"),
            Channel::Keys => write!(f, "keys"),
            Channel::Mouse => write!(f, "mouse"),
        }
    }
}

/// Desired state of every channel plus the held-key bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStates {
    voice: VisualState,
    keys: VisualState,
    mouse: VisualState,
    held_keys: BTreeSet<String>,
}

impl ChannelStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Desired state of a single channel
    pub fn get(&self, channel: Channel) -> VisualState {
        match channel {
            Channel::Voice => self.voice,
            Channel::Keys => self.keys,
            Channel::Mouse => self.mouse,
        }
    }

    /// Desired states in resolver evaluation order
    pub fn candidates(&self) -> [VisualState; 3] {
        Channel::ORDER.map(|channel| self.get(channel))
    }

    /// Held movement keys, sorted
    pub fn held_keys(&self) -> impl Iterator<Item = &str> {
        self.held_keys.iter().map(String::as_str)
    }

    #[cfg(test)]
    pub fn is_held(&self, code: &str) -> bool {
        self.held_keys.contains(code)
    }

    pub fn set_voice(&mut self, state: VisualState) {
        self.voice = state;
    }

    pub fn set_mouse(&mut self, state: VisualState) {
        self.mouse = state;
    }

    /// Mark a movement key as held; the keys channel becomes Wasd
    pub fn hold_key(&mut self, code: &str) {
        self.held_keys.insert(code.to_string());
        self.keys = VisualState::Wasd;
    }

    /// Drop a key after its linger expired
    ///
    /// The keys channel stays Wasd while any other key remains held.
    pub fn drop_key(&mut self, code: &str) {
        self.held_keys.remove(code);
        self.keys = if self.held_keys.is_empty() {
            VisualState::Idle
        } else {
            VisualState::Wasd
        };
    }
}
