//! Global input tap using macOS CGEventTap
//!
//! Listens (never filters) at the head of the session event stream on a
//! dedicated thread with its own CFRunLoop. Requires Accessibility
//! permission for the daemon binary.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::mach_port::CFMachPortRef;
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{error, info, trace, warn};

use crate::hotkey::keys::{KeyCode, ModifierKind, ModifierSet};
use crate::hotkey::listener::{EventSink, EventSource, HotkeyError, InputEvent};
use crate::hotkey::tracker::ModifierTracker;

/// How often the run loop wakes up to check for a stop request
const STOP_POLL: Duration = Duration::from_millis(100);

/// kCGEventSourceStateCombinedSessionState
const COMBINED_SESSION_STATE: i32 = 0;

/// Device-dependent modifier bits carried in the low word of CGEventFlags
mod device_flags {
    pub const LEFT_CONTROL: u64 = 0x0000_0001;
    pub const LEFT_SHIFT: u64 = 0x0000_0002;
    pub const RIGHT_SHIFT: u64 = 0x0000_0004;
    pub const LEFT_COMMAND: u64 = 0x0000_0008;
    pub const RIGHT_COMMAND: u64 = 0x0000_0010;
    pub const LEFT_OPTION: u64 = 0x0000_0020;
    pub const RIGHT_OPTION: u64 = 0x0000_0040;
    pub const RIGHT_CONTROL: u64 = 0x0000_2000;
}

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventSourceFlagsState(state_id: i32) -> u64;
    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
}

/// Mach port of the live tap, readable from inside the tap's own callback
#[derive(Debug, Default)]
struct TapPort(AtomicPtr<c_void>);

impl TapPort {
    fn set(&self, port: CFMachPortRef) {
        self.0.store(port as *mut c_void, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.0.store(ptr::null_mut(), Ordering::SeqCst);
    }

    /// Turn the tap back on after the system disabled it. False if no tap
    /// is registered.
    fn reenable(&self) -> bool {
        let port = self.0.load(Ordering::SeqCst) as CFMachPortRef;
        if port.is_null() {
            return false;
        }
        unsafe { CGEventTapEnable(port, true) };
        true
    }
}

/// CGEventTap-backed event source
pub struct PlatformTap {
    capture_mouse: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PlatformTap {
    pub fn new(capture_mouse: bool) -> Self {
        Self {
            capture_mouse,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl EventSource for PlatformTap {
    fn start(&mut self, sink: EventSink) -> Result<(), HotkeyError> {
        if self.thread.is_some() {
            return Err(HotkeyError::AlreadyRunning);
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let capture_mouse = self.capture_mouse;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), HotkeyError>>();

        let thread = thread::Builder::new()
            .name("hotkey-tap".to_string())
            .spawn(move || {
                info!("event tap thread started");
                run_event_loop(sink, capture_mouse, &running, &ready_tx);
                running.store(false, Ordering::SeqCst);
                info!("event tap thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(HotkeyError::EventTapCreation)
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // The run loop notices the flag within one poll interval
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PlatformTap {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create the tap on the current thread and pump its run loop until stopped
fn run_event_loop(
    sink: EventSink,
    capture_mouse: bool,
    running: &AtomicBool,
    ready: &mpsc::Sender<Result<(), HotkeyError>>,
) {
    let mut interest = vec![
        CGEventType::KeyDown,
        CGEventType::KeyUp,
        CGEventType::FlagsChanged,
    ];
    if capture_mouse {
        interest.extend([
            CGEventType::LeftMouseDown,
            CGEventType::LeftMouseUp,
            CGEventType::RightMouseDown,
            CGEventType::RightMouseUp,
            CGEventType::OtherMouseDown,
            CGEventType::OtherMouseUp,
        ]);
    }

    let port = Arc::new(TapPort::default());
    let callback_port = Arc::clone(&port);

    // Must stay fast and non-blocking: the sink only enqueues
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        match event_type {
            // A slow callback or secure input turns the tap off; it stays
            // installed, so switch it back on instead of going deaf
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                if callback_port.reenable() {
                    warn!("event tap disabled by the system, re-enabled");
                } else {
                    warn!("event tap disabled before it was registered");
                }
            }
            _ => {
                if let Some(input) = translate(event_type, event) {
                    trace!(?input, "tap event");
                    sink(input);
                }
            }
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        interest,
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = ready.send(Err(HotkeyError::EventTapCreation));
            return;
        }
    };

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            let _ = ready.send(Err(HotkeyError::HookInstall(
                "could not create run loop source".into(),
            )));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();
    port.set(tap.mach_port.as_concrete_TypeRef());

    info!(capture_mouse, "event tap created and enabled");
    let _ = ready.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, STOP_POLL, true);
        }
    }

    port.clear();
    // Tap and source are released when they go out of scope
}

/// Convert a tap callback into a normalized event
fn translate(event_type: CGEventType, event: &CGEvent) -> Option<InputEvent> {
    match event_type {
        CGEventType::KeyDown => keyboard_code(event).map(InputEvent::KeyDown),
        CGEventType::KeyUp => keyboard_code(event).map(InputEvent::KeyUp),
        CGEventType::FlagsChanged => modifier_transition(event),
        CGEventType::LeftMouseDown => Some(InputEvent::ButtonDown(KeyCode::MOUSE_LEFT)),
        CGEventType::LeftMouseUp => Some(InputEvent::ButtonUp(KeyCode::MOUSE_LEFT)),
        CGEventType::RightMouseDown => Some(InputEvent::ButtonDown(KeyCode::MOUSE_RIGHT)),
        CGEventType::RightMouseUp => Some(InputEvent::ButtonUp(KeyCode::MOUSE_RIGHT)),
        CGEventType::OtherMouseDown => other_button(event).map(InputEvent::ButtonDown),
        CGEventType::OtherMouseUp => other_button(event).map(InputEvent::ButtonUp),
        _ => None,
    }
}

fn keyboard_code(event: &CGEvent) -> Option<KeyCode> {
    let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
    u16::try_from(code).ok().and_then(mac_to_vk)
}

fn other_button(event: &CGEvent) -> Option<KeyCode> {
    match event.get_integer_value_field(EventField::MOUSE_EVENT_BUTTON_NUMBER) {
        2 => Some(KeyCode::MOUSE_MIDDLE),
        3 => Some(KeyCode::MOUSE_X1),
        4 => Some(KeyCode::MOUSE_X2),
        _ => None,
    }
}

/// Modifier keys arrive as FlagsChanged; the device bit for the key that
/// changed tells whether it went down or up.
fn modifier_transition(event: &CGEvent) -> Option<InputEvent> {
    let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
    let (key, mask) = match code {
        0x38 => (KeyCode::LEFT_SHIFT, device_flags::LEFT_SHIFT),
        0x3C => (KeyCode::RIGHT_SHIFT, device_flags::RIGHT_SHIFT),
        0x3B => (KeyCode::LEFT_CONTROL, device_flags::LEFT_CONTROL),
        0x3E => (KeyCode::RIGHT_CONTROL, device_flags::RIGHT_CONTROL),
        0x3A => (KeyCode::LEFT_ALT, device_flags::LEFT_OPTION),
        0x3D => (KeyCode::RIGHT_ALT, device_flags::RIGHT_OPTION),
        0x37 => (KeyCode::LEFT_META, device_flags::LEFT_COMMAND),
        0x36 => (KeyCode::RIGHT_META, device_flags::RIGHT_COMMAND),
        _ => return None,
    };

    if event.get_flags().bits() & mask != 0 {
        Some(InputEvent::KeyDown(key))
    } else {
        Some(InputEvent::KeyUp(key))
    }
}

/// Map a macOS virtual keycode (kVK_*) to the shared numbering
fn mac_to_vk(code: u16) -> Option<KeyCode> {
    let vk = match code {
        0x00 => 0x41, // A
        0x0B => 0x42, // B
        0x08 => 0x43, // C
        0x02 => 0x44, // D
        0x0E => 0x45, // E
        0x03 => 0x46, // F
        0x05 => 0x47, // G
        0x04 => 0x48, // H
        0x22 => 0x49, // I
        0x26 => 0x4A, // J
        0x28 => 0x4B, // K
        0x25 => 0x4C, // L
        0x2E => 0x4D, // M
        0x2D => 0x4E, // N
        0x1F => 0x4F, // O
        0x23 => 0x50, // P
        0x0C => 0x51, // Q
        0x0F => 0x52, // R
        0x01 => 0x53, // S
        0x11 => 0x54, // T
        0x20 => 0x55, // U
        0x09 => 0x56, // V
        0x0D => 0x57, // W
        0x07 => 0x58, // X
        0x10 => 0x59, // Y
        0x06 => 0x5A, // Z

        0x1D => 0x30,
        0x12 => 0x31,
        0x13 => 0x32,
        0x14 => 0x33,
        0x15 => 0x34,
        0x17 => 0x35,
        0x16 => 0x36,
        0x1A => 0x37,
        0x1C => 0x38,
        0x19 => 0x39,

        0x7A => 0x70, // F1
        0x78 => 0x71,
        0x63 => 0x72,
        0x76 => 0x73,
        0x60 => 0x74,
        0x61 => 0x75,
        0x62 => 0x76,
        0x64 => 0x77,
        0x65 => 0x78,
        0x6D => 0x79,
        0x67 => 0x7A,
        0x6F => 0x7B, // F12
        0x69 => 0x7C, // F13
        0x6B => 0x7D,
        0x71 => 0x7E,
        0x6A => 0x7F,
        0x40 => 0x80,
        0x4F => 0x81,
        0x50 => 0x82,
        0x5A => 0x83, // F20

        0x24 => 0x0D, // Return
        0x30 => 0x09, // Tab
        0x31 => 0x20, // Space
        0x33 => 0x08, // Delete (backspace)
        0x35 => 0x1B, // Escape
        0x39 => 0x14, // Caps Lock
        0x72 => 0x2D, // Help sits where Insert does
        0x75 => 0x2E, // Forward delete
        0x73 => 0x24, // Home
        0x77 => 0x23, // End
        0x74 => 0x21, // Page up
        0x79 => 0x22, // Page down
        0x7B => 0x25, // Left
        0x7C => 0x27, // Right
        0x7D => 0x28, // Down
        0x7E => 0x26, // Up

        0x52 => 0x60, // Keypad 0
        0x53 => 0x61,
        0x54 => 0x62,
        0x55 => 0x63,
        0x56 => 0x64,
        0x57 => 0x65,
        0x58 => 0x66,
        0x59 => 0x67,
        0x5B => 0x68,
        0x5C => 0x69, // Keypad 9
        0x43 => 0x6A, // Keypad *
        0x45 => 0x6B, // Keypad +
        0x4E => 0x6D, // Keypad -
        0x41 => 0x6E, // Keypad .
        0x4B => 0x6F, // Keypad /
        0x4C => 0x0D, // Keypad enter
        0x47 => 0x90, // Clear sits where Num Lock does

        0x29 => 0xBA, // ;
        0x18 => 0xBB, // =
        0x2B => 0xBC, // ,
        0x1B => 0xBD, // -
        0x2F => 0xBE, // .
        0x2C => 0xBF, // /
        0x32 => 0xC0, // `
        0x21 => 0xDB, // [
        0x2A => 0xDC, // \
        0x1E => 0xDD, // ]
        0x27 => 0xDE, // '

        _ => return None,
    };
    Some(KeyCode(vk))
}

/// Live modifier state from the combined session event source
#[derive(Debug, Default)]
pub struct SystemModifiers;

impl SystemModifiers {
    pub fn new() -> Self {
        Self
    }
}

impl ModifierTracker for SystemModifiers {
    fn current_modifiers(&self) -> ModifierSet {
        let raw = unsafe { CGEventSourceFlagsState(COMBINED_SESSION_STATE) };
        let flags = CGEventFlags::from_bits_truncate(raw);

        let mut set = ModifierSet::NONE;
        if flags.contains(CGEventFlags::CGEventFlagShift) {
            set.insert(ModifierKind::Shift);
        }
        if flags.contains(CGEventFlags::CGEventFlagControl) {
            set.insert(ModifierKind::Ctrl);
        }
        if flags.contains(CGEventFlags::CGEventFlagAlternate) {
            set.insert(ModifierKind::Alt);
        }
        if flags.contains(CGEventFlags::CGEventFlagCommand) {
            set.insert(ModifierKind::Meta);
        }
        set
    }
}
