//! Live modifier state
//!
//! Modifiers that were already held before a key sequence began never show
//! up as key-down events, so matching asks the platform directly.

use super::keys::ModifierSet;

/// Reports the modifiers held right now. Queried from the tap thread for
/// every event; classifying modifier keys is `KeyCode::modifier`.
pub trait ModifierTracker: Send + Sync {
    /// Modifiers currently held, according to the platform
    fn current_modifiers(&self) -> ModifierSet;
}

#[cfg(test)]
pub use scripted::ScriptedModifiers;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::keys::ModifierKind;

    #[test]
    fn test_scripted_modifiers() {
        let tracker = ScriptedModifiers::new();
        assert!(tracker.current_modifiers().is_empty());

        tracker.set(&[ModifierKind::Shift, ModifierKind::Meta]);
        assert_eq!(
            tracker.current_modifiers(),
            ModifierSet::of(&[ModifierKind::Shift, ModifierKind::Meta])
        );
    }
}
