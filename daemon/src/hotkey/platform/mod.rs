//! Native input taps
//!
//! Each backend exposes `PlatformTap` (an [`EventSource`]) and
//! `SystemModifiers` (a [`ModifierTracker`]) and translates native codes to
//! the shared virtual-key numbering.
//!
//! [`EventSource`]: super::listener::EventSource
//! [`ModifierTracker`]: super::tracker::ModifierTracker

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::{PlatformTap, SystemModifiers};

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use windows::{PlatformTap, SystemModifiers};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::{PlatformTap, SystemModifiers};

#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
mod unsupported;
#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
pub use unsupported::{PlatformTap, SystemModifiers};
