//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::engine::{Binding, MatchMode};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Binding that fires once per press
    pub toggle: Binding,

    /// Binding with press and release events
    pub hold: Binding,

    /// Install the mouse hook alongside the keyboard hook
    pub capture_mouse: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match var("SILENCE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = var("HOME").context("HOME is not set")?;
                PathBuf::from(home).join(".local").join("share").join("silence")
            }
        };

        let socket_path = var("SILENCE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let toggle = binding_var(&var, "SILENCE_TOGGLE_HOTKEY", "SILENCE_TOGGLE_EXACT")?;
        let hold = binding_var(&var, "SILENCE_HOLD_HOTKEY", "SILENCE_HOLD_EXACT")?;
        let capture_mouse = flag(var("SILENCE_CAPTURE_MOUSE").as_deref()).unwrap_or(true);

        Ok(Self {
            socket_path,
            data_dir,
            toggle,
            hold,
            capture_mouse,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn binding_var<F>(var: &F, binding_name: &str, exact_name: &str) -> Result<Binding>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(text) = var(binding_name).filter(|text| !text.trim().is_empty()) else {
        return Ok(Binding::default());
    };
    let binding: Binding = text
        .parse()
        .with_context(|| format!("invalid {binding_name}: {text:?}"))?;

    let mode = if flag(var(exact_name).as_deref()).unwrap_or(false) {
        MatchMode::Exact
    } else {
        MatchMode::Subset
    };
    Ok(binding.with_mode(mode))
}

/// `1/true/yes/on` and `0/false/no/off`, anything else is unset
fn flag(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::hotkey::{KeyCode, ModifierKind, ModifierSet};

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config(&[("HOME", "/home/test")]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/home/test/.local/share/silence"));
        assert_eq!(
            config.socket_path,
            PathBuf::from("/home/test/.local/share/silence/daemon.sock")
        );
        assert_eq!(config.toggle, Binding::default());
        assert_eq!(config.hold, Binding::default());
        assert!(config.capture_mouse);
    }

    #[test]
    fn test_config_requires_home_without_data_dir() {
        assert!(config(&[]).is_err());

        let config = config(&[("SILENCE_DATA_DIR", "/tmp/silence")]).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/silence/daemon.sock"));
    }

    #[test]
    fn test_config_overrides() {
        let config = config(&[
            ("HOME", "/home/test"),
            ("SILENCE_SOCKET", "/run/silence.sock"),
            ("SILENCE_TOGGLE_HOTKEY", "Ctrl+Alt+M"),
            ("SILENCE_HOLD_HOTKEY", "ctrl + shift"),
            ("SILENCE_HOLD_EXACT", "true"),
            ("SILENCE_CAPTURE_MOUSE", "0"),
        ])
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/silence.sock"));
        assert_eq!(
            config.toggle,
            Binding::key(
                KeyCode(0x4D),
                ModifierSet::of(&[ModifierKind::Ctrl, ModifierKind::Alt])
            )
        );
        assert_eq!(
            config.hold,
            Binding::modifier_only(ModifierSet::of(&[ModifierKind::Ctrl, ModifierKind::Shift]))
                .with_mode(MatchMode::Exact)
        );
        assert!(!config.capture_mouse);
    }

    #[test]
    fn test_config_rejects_bad_binding() {
        let err = config(&[("HOME", "/home/test"), ("SILENCE_TOGGLE_HOTKEY", "Ctrl+Nope")])
            .unwrap_err();
        assert!(err.to_string().contains("SILENCE_TOGGLE_HOTKEY"));
    }

    #[test]
    fn test_flag_values() {
        assert_eq!(flag(Some("YES")), Some(true));
        assert_eq!(flag(Some(" off ")), Some(false));
        assert_eq!(flag(Some("maybe")), None);
        assert_eq!(flag(None), None);
    }
}
