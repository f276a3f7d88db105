//! Events emitted by the hotkey engine
//!
//! Published on a broadcast channel; the IPC server forwards them to
//! subscribed clients and the daemon logs them.

use serde::{Deserialize, Serialize};

use crate::hotkey::{KeyCode, ModifierSet};

/// Outward notifications from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HotkeyEvent {
    /// The Toggle binding was pressed
    HotkeyPressed,

    /// The Hold binding went down
    HoldPressed,

    /// A key belonging to the active Hold binding was released
    HoldReleased,

    /// Recording produced a binding
    BindingCaptured {
        /// Trigger key, or 0 for a modifier-only binding
        key_code: KeyCode,
        modifiers: ModifierSet,
    },

    /// The modifiers accumulated during recording changed
    ModifiersChanged { modifiers: ModifierSet },

    /// Dwell timer progress in `[0, 1]`; 0 means no dwell is running
    HoldProgress { fraction: f64 },
}

impl std::fmt::Display for HotkeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotkeyEvent::HotkeyPressed => write!(f, "HOTKEY_PRESSED"),
            HotkeyEvent::HoldPressed => write!(f, "HOLD_PRESSED"),
            HotkeyEvent::HoldReleased => write!(f, "HOLD_RELEASED"),
            HotkeyEvent::BindingCaptured { key_code, modifiers } => {
                if *key_code == KeyCode::NONE {
                    write!(f, "BINDING_CAPTURED ({modifiers})")
                } else if modifiers.is_empty() {
                    write!(f, "BINDING_CAPTURED ({key_code})")
                } else {
                    write!(f, "BINDING_CAPTURED ({modifiers} + {key_code})")
                }
            }
            HotkeyEvent::ModifiersChanged { modifiers } => {
                write!(f, "MODIFIERS_CHANGED ({modifiers})")
            }
            HotkeyEvent::HoldProgress { fraction } => {
                write!(f, "HOLD_PROGRESS ({:.0}%)", fraction * 100.0)
            }
        }
    }
}
