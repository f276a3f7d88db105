//! Hotkey engine
//!
//! Matches live input against the Toggle and Hold bindings, or records a new
//! binding when recording is enabled. Everything runs on one dispatcher task:
//! - `BindingMatcher`: normal operation, owns the Hold latch
//! - `RecordingSession`: capture state machine with dwell disambiguation
//! - `Dispatcher`: routes input, ticks and commands

mod binding;
mod dispatcher;
mod matcher;
mod recording;
mod ticker;

pub use binding::{Binding, BindingParseError, BindingSlot, MatchMode};
pub use dispatcher::{Command, Dispatcher, EngineHandle, EngineStatus, EngineStopped};
