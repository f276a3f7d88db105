//! Key codes and modifier sets
//!
//! Every platform backend normalizes its native codes into the Windows
//! virtual-key numbering. Mouse buttons use the reserved codes 0x01..=0x06
//! that no keyboard reports, so keys and buttons share one code space.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

use serde::{Deserialize, Serialize};

/// A physical key or mouse button in virtual-key numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u16);

impl KeyCode {
    /// No key; used on the wire for modifier-only bindings
    pub const NONE: Self = Self(0);

    /// Primary mouse button
    pub const MOUSE_LEFT: Self = Self(0x01);
    /// Secondary mouse button
    pub const MOUSE_RIGHT: Self = Self(0x02);
    /// Middle mouse button (wheel click)
    pub const MOUSE_MIDDLE: Self = Self(0x04);
    /// First side button ("Mouse 4")
    pub const MOUSE_X1: Self = Self(0x05);
    /// Second side button ("Mouse 5")
    pub const MOUSE_X2: Self = Self(0x06);

    pub const SHIFT: Self = Self(0x10);
    pub const CONTROL: Self = Self(0x11);
    pub const ALT: Self = Self(0x12);
    pub const LEFT_SHIFT: Self = Self(0xA0);
    pub const RIGHT_SHIFT: Self = Self(0xA1);
    pub const LEFT_CONTROL: Self = Self(0xA2);
    pub const RIGHT_CONTROL: Self = Self(0xA3);
    pub const LEFT_ALT: Self = Self(0xA4);
    pub const RIGHT_ALT: Self = Self(0xA5);
    pub const LEFT_META: Self = Self(0x5B);
    pub const RIGHT_META: Self = Self(0x5C);

    /// Raw numeric value
    pub fn code(self) -> u16 {
        self.0
    }

    /// True for the five synthetic mouse button codes
    pub fn is_mouse_button(self) -> bool {
        matches!(self.0, 0x01 | 0x02 | 0x04 | 0x05 | 0x06)
    }

    /// Left and right clicks have an everyday meaning, so recording them
    /// requires holding the button through the dwell window.
    pub fn needs_dwell(self) -> bool {
        self == Self::MOUSE_LEFT || self == Self::MOUSE_RIGHT
    }

    /// Logical modifier this key belongs to, if any
    pub fn modifier(self) -> Option<ModifierKind> {
        classify(self)
    }

    /// Human-readable name, e.g. `Mouse 4`, `F13`, `Numpad 5`
    pub fn name(self) -> String {
        let code = self.0;
        let fixed = match code {
            0x01 => "Mouse Left",
            0x02 => "Mouse Right",
            0x04 => "Mouse Middle",
            0x05 => "Mouse 4",
            0x06 => "Mouse 5",
            0x08 => "Backspace",
            0x09 => "Tab",
            0x0D => "Enter",
            0x10 => "Shift",
            0x11 => "Ctrl",
            0x12 => "Alt",
            0x13 => "Pause",
            0x14 => "Caps Lock",
            0x1B => "Escape",
            0x20 => "Space",
            0x21 => "Page Up",
            0x22 => "Page Down",
            0x23 => "End",
            0x24 => "Home",
            0x25 => "Left",
            0x26 => "Up",
            0x27 => "Right",
            0x28 => "Down",
            0x2C => "Print Screen",
            0x2D => "Insert",
            0x2E => "Delete",
            0x5B => "Left Win",
            0x5C => "Right Win",
            0x6A => "Numpad *",
            0x6B => "Numpad +",
            0x6D => "Numpad -",
            0x6E => "Numpad .",
            0x6F => "Numpad /",
            0x90 => "Num Lock",
            0x91 => "Scroll Lock",
            0xA0 => "Left Shift",
            0xA1 => "Right Shift",
            0xA2 => "Left Ctrl",
            0xA3 => "Right Ctrl",
            0xA4 => "Left Alt",
            0xA5 => "Right Alt",
            0xBA => ";",
            0xBB => "=",
            0xBC => ",",
            0xBD => "-",
            0xBE => ".",
            0xBF => "/",
            0xC0 => "`",
            0xDB => "[",
            0xDC => "\\",
            0xDD => "]",
            0xDE => "'",
            _ => "",
        };
        if !fixed.is_empty() {
            return fixed.to_string();
        }
        match code {
            0x30..=0x39 | 0x41..=0x5A => char::from(code as u8).to_string(),
            0x60..=0x69 => format!("Numpad {}", code - 0x60),
            0x70..=0x87 => format!("F{}", code - 0x70 + 1),
            _ => format!("Key {code}"),
        }
    }

    /// Inverse of [`KeyCode::name`]. Case and spaces are ignored, so
    /// `mouse4`, `Numpad5` and `page up` all resolve.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = normalize_name(name);
        if wanted.is_empty() {
            return None;
        }
        (1..=0xFE)
            .map(Self)
            .find(|key| normalize_name(&key.name()) == wanted)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Logical modifier, independent of which physical key produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierKind {
    Shift,
    Ctrl,
    Alt,
    Meta,
}

impl ModifierKind {
    /// Display order used for binding strings
    pub const ALL: [ModifierKind; 4] = [Self::Ctrl, Self::Alt, Self::Shift, Self::Meta];

    fn bit(self) -> u8 {
        match self {
            Self::Shift => 1,
            Self::Ctrl => 2,
            Self::Alt => 4,
            Self::Meta => 8,
        }
    }

    /// Parse a modifier name as written in binding strings
    pub fn from_name(name: &str) -> Option<Self> {
        match normalize_name(name).as_str() {
            "ctrl" | "control" => Some(Self::Ctrl),
            "alt" | "option" | "opt" => Some(Self::Alt),
            "shift" => Some(Self::Shift),
            "win" | "meta" | "cmd" | "command" | "super" => Some(Self::Meta),
            _ => None,
        }
    }
}

impl fmt::Display for ModifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Shift => "Shift",
            Self::Ctrl => "Ctrl",
            Self::Alt => "Alt",
            Self::Meta => "Win",
        };
        f.write_str(name)
    }
}

/// Maps the eleven physical modifier codes to their logical modifier
pub fn classify(key: KeyCode) -> Option<ModifierKind> {
    match key.0 {
        0x10 | 0xA0 | 0xA1 => Some(ModifierKind::Shift),
        0x11 | 0xA2 | 0xA3 => Some(ModifierKind::Ctrl),
        0x12 | 0xA4 | 0xA5 => Some(ModifierKind::Alt),
        0x5B | 0x5C => Some(ModifierKind::Meta),
        _ => None,
    }
}

/// Set of logical modifiers held at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<ModifierKind>", from = "Vec<ModifierKind>")]
pub struct ModifierSet(u8);

impl ModifierSet {
    pub const NONE: Self = Self(0);

    /// Build a set from a list of modifiers
    pub fn of(kinds: &[ModifierKind]) -> Self {
        kinds.iter().fold(Self::NONE, |set, kind| set | *kind)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of distinct modifiers held
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn contains(self, kind: ModifierKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: ModifierKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: ModifierKind) {
        self.0 &= !kind.bit();
    }

    /// Members in display order
    pub fn iter(self) -> impl Iterator<Item = ModifierKind> {
        ModifierKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl From<ModifierKind> for ModifierSet {
    fn from(kind: ModifierKind) -> Self {
        Self(kind.bit())
    }
}

impl From<Vec<ModifierKind>> for ModifierSet {
    fn from(kinds: Vec<ModifierKind>) -> Self {
        Self::of(&kinds)
    }
}

impl From<ModifierSet> for Vec<ModifierKind> {
    fn from(set: ModifierSet) -> Self {
        set.iter().collect()
    }
}

impl BitOr for ModifierSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<ModifierKind> for ModifierSet {
    type Output = Self;

    fn bitor(self, rhs: ModifierKind) -> Self {
        Self(self.0 | rhs.bit())
    }
}

impl BitOrAssign for ModifierSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ModifierSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Sub for ModifierSet {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Display for ModifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|kind| kind.to_string()).collect();
        f.write_str(&parts.join(" + "))
    }
}
