//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::engine::{Binding, BindingSlot, Command, EngineStatus};
use crate::events::HotkeyEvent;

/// Requests from client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to engine notifications
    Subscribe,

    /// Replace both bindings
    ConfigureBindings {
        #[serde(default)]
        toggle: Binding,
        #[serde(default)]
        hold: Binding,
    },

    /// Replace one binding
    SetBinding { slot: BindingSlot, binding: Binding },

    /// Enter or leave recording, optionally targeting a slot
    SetRecording {
        active: bool,
        #[serde(default)]
        slot: Option<BindingSlot>,
    },

    /// Install the input tap
    StartTap,

    /// Remove the input tap
    StopTap,
}

impl Request {
    /// Engine command carried by this request, if any
    pub fn into_command(self) -> Option<Command> {
        match self {
            Request::ConfigureBindings { toggle, hold } => {
                Some(Command::ConfigureBindings { toggle, hold })
            }
            Request::SetBinding { slot, binding } => Some(Command::SetBinding { slot, binding }),
            Request::SetRecording { active, slot } => Some(Command::SetRecording { active, slot }),
            Request::StartTap => Some(Command::StartTap),
            Request::StopTap => Some(Command::StopTap),
            Request::Ping | Request::GetStatus | Request::Subscribe => None,
        }
    }
}

/// Responses from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Command queued for the engine
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to client (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Engine event occurred
    #[serde(rename = "notification")]
    Event { event: HotkeyEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the input tap is installed
    pub is_hooked: bool,

    /// Whether a recording session is active
    pub recording: bool,

    pub toggle: Binding,
    pub hold: Binding,

    /// Whether the Hold binding is currently pressed
    pub hold_active: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn new(engine: &EngineStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            is_hooked: engine.hooked,
            recording: engine.recording,
            toggle: engine.toggle,
            hold: engine.hold,
            hold_active: engine.hold_active,
            uptime_secs,
        }
    }
}
