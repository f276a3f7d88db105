//! Fallback for targets without a global input hook

use crate::hotkey::keys::ModifierSet;
use crate::hotkey::listener::{EventSink, EventSource, HotkeyError};
use crate::hotkey::tracker::ModifierTracker;

/// Tap that always refuses to install
pub struct PlatformTap;

impl PlatformTap {
    pub fn new(_capture_mouse: bool) -> Self {
        Self
    }
}

impl EventSource for PlatformTap {
    fn start(&mut self, _sink: EventSink) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unsupported)
    }

    fn stop(&mut self) {}
}

/// Reports no modifiers
#[derive(Debug, Default)]
pub struct SystemModifiers;

impl SystemModifiers {
    pub fn new() -> Self {
        Self
    }
}

impl ModifierTracker for SystemModifiers {
    fn current_modifiers(&self) -> ModifierSet {
        ModifierSet::NONE
    }
}
