//! Global keyboard and mouse-button interception
//!
//! The platform backend delivers normalized transitions to a sink on its own
//! input thread; key codes follow one shared numbering on every platform.

mod keys;
mod listener;
mod platform;
mod tracker;

pub use keys::{KeyCode, ModifierKind, ModifierSet};
pub use listener::{HotkeyListener, InputEvent};
pub use platform::SystemModifiers;
pub use tracker::ModifierTracker;

#[cfg(test)]
pub use listener::{SyntheticInput, SyntheticSource};
#[cfg(test)]
pub use tracker::ScriptedModifiers;
