//! Normal-operation matching of live input against the Toggle and Hold bindings
//!
//! Hold is evaluated before Toggle. When both bindings share a trigger key
//! and Hold would match, Toggle stays silent for that key-down.

use tracing::debug;

use crate::events::HotkeyEvent;
use crate::hotkey::{KeyCode, ModifierSet};

use super::binding::{Binding, BindingSlot};

/// Matches presses and releases against the configured bindings.
/// Owns the Hold latch.
#[derive(Debug, Default)]
pub struct BindingMatcher {
    toggle: Binding,
    hold: Binding,
    hold_active: bool,
}

impl BindingMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both bindings; the Hold latch is cleared without a release event
    pub fn configure(&mut self, toggle: Binding, hold: Binding) {
        self.toggle = toggle;
        self.hold = hold;
        self.hold_active = false;
    }

    /// Replace one binding. Replacing Hold clears its latch.
    pub fn set(&mut self, slot: BindingSlot, binding: Binding) {
        match slot {
            BindingSlot::Toggle => self.toggle = binding,
            BindingSlot::Hold => {
                self.hold = binding;
                self.hold_active = false;
            }
        }
    }

    /// Forget a Hold press whose release can no longer be observed
    pub fn reset_hold(&mut self) {
        self.hold_active = false;
    }

    pub fn binding(&self, slot: BindingSlot) -> Binding {
        match slot {
            BindingSlot::Toggle => self.toggle,
            BindingSlot::Hold => self.hold,
        }
    }

    pub fn hold_active(&self) -> bool {
        self.hold_active
    }

    /// Evaluate a key-down or button-down. `current` is the live modifier
    /// state reported by the platform.
    pub fn on_press(&mut self, key: KeyCode, current: ModifierSet) -> Option<HotkeyEvent> {
        let modifier = key.modifier();
        let live = match modifier {
            Some(kind) => current | kind,
            None => current,
        };

        if !self.hold_active && self.hold.is_usable() {
            let hold_hit = if self.hold.is_modifier_only() {
                modifier.is_some() && self.hold.accepts(live)
            } else {
                self.hold.trigger == Some(key) && self.hold.accepts(live)
            };
            if hold_hit {
                self.hold_active = true;
                debug!(%key, binding = %self.hold, "hold binding pressed");
                return Some(HotkeyEvent::HoldPressed);
            }
        }

        if !self.toggle.is_usable() {
            return None;
        }

        if self.toggle.is_modifier_only() {
            if modifier.is_some() && self.toggle.accepts(live) {
                debug!(%key, binding = %self.toggle, "toggle binding pressed");
                return Some(HotkeyEvent::HotkeyPressed);
            }
            return None;
        }

        if self.toggle.trigger != Some(key) {
            return None;
        }
        if self.hold.trigger == Some(key) && self.hold.accepts(live) {
            debug!(%key, "toggle suppressed by hold binding on shared key");
            return None;
        }
        if self.toggle.accepts(live) {
            debug!(%key, binding = %self.toggle, "toggle binding pressed");
            return Some(HotkeyEvent::HotkeyPressed);
        }
        None
    }

    /// Evaluate a key-up or button-up. Only a release belonging to the
    /// active Hold binding has an effect.
    pub fn on_release(&mut self, key: KeyCode) -> Option<HotkeyEvent> {
        if !self.hold_active {
            return None;
        }

        let releases_hold = match self.hold.trigger {
            None => key
                .modifier()
                .is_some_and(|kind| self.hold.modifiers.contains(kind)),
            Some(trigger) => trigger == key,
        };

        if releases_hold {
            self.hold_active = false;
            debug!(%key, "hold binding released");
            Some(HotkeyEvent::HoldReleased)
        } else {
            None
        }
    }
}
