//! Hotkey bindings and modifier matching

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hotkey::{KeyCode, ModifierKind, ModifierSet};

/// How held modifiers are compared against a binding's required set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// All required modifiers held; extras tolerated
    #[default]
    Subset,
    /// Held modifiers equal the required set exactly
    Exact,
}

impl MatchMode {
    pub fn matches(self, live: ModifierSet, required: ModifierSet) -> bool {
        match self {
            Self::Subset => live & required == required,
            Self::Exact => live == required,
        }
    }
}

/// A key (or mouse button) plus the modifiers that must accompany it.
///
/// Without a trigger the binding is modifier-only and is satisfied by the
/// modifier combination alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireBinding")]
pub struct Binding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<KeyCode>,
    pub modifiers: ModifierSet,
    pub mode: MatchMode,
}

impl Binding {
    /// Key-form binding. `KeyCode::NONE` yields a modifier-only binding.
    pub fn key(trigger: KeyCode, modifiers: ModifierSet) -> Self {
        Self {
            trigger: (trigger != KeyCode::NONE).then_some(trigger),
            modifiers,
            mode: MatchMode::Subset,
        }
    }

    pub fn modifier_only(modifiers: ModifierSet) -> Self {
        Self {
            trigger: None,
            modifiers,
            mode: MatchMode::Subset,
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_modifier_only(&self) -> bool {
        self.trigger.is_none()
    }

    /// A binding with neither trigger nor modifiers never matches anything
    pub fn is_usable(&self) -> bool {
        self.trigger.is_some() || !self.modifiers.is_empty()
    }

    /// Whether `live` satisfies the required modifiers under this binding's mode
    pub fn accepts(&self, live: ModifierSet) -> bool {
        self.mode.matches(live, self.modifiers)
    }

    /// Trigger as a wire key code, 0 for modifier-only
    pub fn key_code(&self) -> KeyCode {
        self.trigger.unwrap_or(KeyCode::NONE)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.trigger, self.modifiers.is_empty()) {
            (None, true) => f.write_str("None"),
            (None, false) => write!(f, "{}", self.modifiers),
            (Some(key), true) => write!(f, "{key}"),
            (Some(key), false) => write!(f, "{} + {key}", self.modifiers),
        }
    }
}

/// Binding as a client sends it; trigger 0 means modifier-only
#[derive(Deserialize)]
struct WireBinding {
    #[serde(default)]
    trigger: Option<KeyCode>,
    #[serde(default)]
    modifiers: ModifierSet,
    #[serde(default)]
    mode: MatchMode,
}

impl TryFrom<WireBinding> for Binding {
    type Error = BindingParseError;

    fn try_from(wire: WireBinding) -> Result<Self, Self::Error> {
        let trigger = wire.trigger.unwrap_or(KeyCode::NONE);
        if trigger.0 > 0xFF {
            return Err(BindingParseError::KeyCodeOutOfRange(trigger.0));
        }
        Ok(Binding::key(trigger, wire.modifiers).with_mode(wire.mode))
    }
}

/// Errors from parsing a binding string such as `Ctrl+Alt+M`, or a binding
/// received over IPC
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingParseError {
    #[error("binding is empty")]
    Empty,

    #[error("unknown key or modifier: {0:?}")]
    UnknownKey(String),

    #[error("binding names more than one key: {0:?} and {1:?}")]
    MultipleKeys(String, String),

    #[error("key code {0} is outside 1..=255")]
    KeyCodeOutOfRange(u16),
}

impl FromStr for Binding {
    type Err = BindingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut trigger: Option<(KeyCode, String)> = None;
        let mut modifiers = ModifierSet::NONE;

        for token in tokens(s) {
            if let Some(kind) = ModifierKind::from_name(&token) {
                modifiers.insert(kind);
                continue;
            }
            let key = KeyCode::from_name(&token)
                .ok_or_else(|| BindingParseError::UnknownKey(token.clone()))?;
            // "Left Ctrl" and friends name a modifier, not a trigger
            if let Some(kind) = key.modifier() {
                modifiers.insert(kind);
                continue;
            }
            if let Some((_, previous)) = &trigger {
                return Err(BindingParseError::MultipleKeys(previous.clone(), token));
            }
            trigger = Some((key, token));
        }

        let binding = match trigger {
            Some((key, _)) => Binding::key(key, modifiers),
            None => Binding::modifier_only(modifiers),
        };
        if binding.is_usable() {
            Ok(binding)
        } else {
            Err(BindingParseError::Empty)
        }
    }
}

/// Split on `+`, keeping `Numpad +` together
fn tokens(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut parts = s.split('+').map(str::trim).peekable();
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case("numpad") && parts.peek() == Some(&"") {
            parts.next();
            out.push("Numpad +".to_string());
        } else if !part.is_empty() {
            out.push(part.to_string());
        }
    }
    out
}

/// The two independently configured bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSlot {
    /// Fires once per qualifying press
    Toggle,
    /// Reports press and release
    Hold,
}

impl fmt::Display for BindingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toggle => f.write_str("toggle"),
            Self::Hold => f.write_str("hold"),
        }
    }
}
