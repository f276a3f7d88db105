//! Global input tap
//!
//! Wraps a platform event source that observes every keyboard and mouse
//! button transition system-wide without consuming it. The source calls the
//! sink on its own input thread, so sinks must return immediately.

use tracing::{info, warn};

use super::keys::KeyCode;
use super::platform::PlatformTap;

/// Normalized input transition delivered by a tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    ButtonDown(KeyCode),
    ButtonUp(KeyCode),
}

impl InputEvent {
    /// Key or button code carried by the event
    pub fn key(&self) -> KeyCode {
        match *self {
            Self::KeyDown(key) | Self::KeyUp(key) | Self::ButtonDown(key) | Self::ButtonUp(key) => {
                key
            }
        }
    }

    /// True for key-down and button-down
    pub fn is_press(&self) -> bool {
        matches!(self, Self::KeyDown(_) | Self::ButtonDown(_))
    }
}

/// Callback invoked by a tap for each transition, on the tap's thread
pub type EventSink = Box<dyn Fn(InputEvent) + Send + 'static>;

/// A system-wide, non-consuming source of input transitions
pub trait EventSource: Send {
    /// Install the hook and start delivering events to `sink`
    fn start(&mut self, sink: EventSink) -> Result<(), HotkeyError>;

    /// Remove the hook. Must not return until no further sink calls can happen.
    fn stop(&mut self);
}

/// Errors that can occur while installing the input tap
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("input tap is already running")]
    AlreadyRunning,

    #[error("global input capture is not supported on this platform")]
    Unsupported,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to install input hook: {0}")]
    HookInstall(String),

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns the single active input tap
pub struct HotkeyListener {
    source: Box<dyn EventSource>,
    hooked: bool,
}

impl HotkeyListener {
    /// Create a listener around any event source
    pub fn new(source: Box<dyn EventSource>) -> Self {
        Self {
            source,
            hooked: false,
        }
    }

    /// Create a listener backed by this platform's native hook
    pub fn platform(capture_mouse: bool) -> Self {
        Self::new(Box::new(PlatformTap::new(capture_mouse)))
    }

    /// Install the tap, tearing down any previous one first
    pub fn start(&mut self, sink: EventSink) -> Result<(), HotkeyError> {
        self.stop();

        match self.source.start(sink) {
            Ok(()) => {
                self.hooked = true;
                info!("input tap installed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "input tap installation failed");
                Err(e)
            }
        }
    }

    /// Remove the tap. Safe to call when nothing is installed.
    pub fn stop(&mut self) {
        if self.hooked {
            self.source.stop();
            self.hooked = false;
            info!("input tap removed");
        }
    }

    /// Whether a tap is currently installed
    pub fn is_hooked(&self) -> bool {
        self.hooked
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub use synthetic::{SyntheticInput, SyntheticSource};
