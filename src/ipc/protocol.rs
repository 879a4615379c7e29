//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::OverlayEvent;
use crate::state::{Snapshot, VisualState};

/// Requests from a control client to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current overlay status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to state and frame notifications
    Subscribe,

    /// Inject a movement key press
    TriggerKey { code: String },

    /// Inject a movement key release
    ReleaseKey { code: String },

    /// Inject a mouse button press
    TriggerMouse { button: i64 },

    /// Inject a mouse button release
    ReleaseMouse { button: i64 },

    /// Force the voice channel into a state (it still decays)
    SetVoiceState { state: VisualState },

    /// Feed a loudness sample as if it came from the microphone
    SetLevel { level: f32 },
}

/// Responses and notifications from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current overlay status
    Status(OverlayStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Injected input was handed to the engine
    Accepted,

    /// Pushed to subscribed clients
    Event { event: OverlayEvent },

    /// Error response
    Error { code: String, message: String },
}

/// Full status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Engine state at the time of the request
    pub snapshot: Snapshot,
}
