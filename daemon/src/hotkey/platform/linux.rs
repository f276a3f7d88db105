//! Global input tap via the Linux evdev interface (/dev/input/event*)
//!
//! `start()` opens every keyboard (and, with mouse capture, every pointer
//! device) on the calling thread so permission problems surface immediately,
//! then reads them on a background thread with a current-thread tokio
//! runtime. Devices are not grabbed, so input still reaches everyone else.
//!
//! Required permissions: the daemon user must be in the `input` group.

use std::sync::atomic::{AtomicU16, Ordering};
use std::thread::{self, JoinHandle};

use evdev::{Device, InputEventKind, Key};
use futures::stream::SelectAll;
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace};

use crate::hotkey::keys::{KeyCode, ModifierKind, ModifierSet};
use crate::hotkey::listener::{EventSink, EventSource, HotkeyError, InputEvent};
use crate::hotkey::tracker::ModifierTracker;

/// Physical modifier keys currently held, one bit per key, fed by the tap
static HELD_MODIFIERS: AtomicU16 = AtomicU16::new(0);

/// evdev capture backend
pub struct PlatformTap {
    capture_mouse: bool,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PlatformTap {
    pub fn new(capture_mouse: bool) -> Self {
        Self {
            capture_mouse,
            stop_tx: None,
            thread: None,
        }
    }
}

impl EventSource for PlatformTap {
    fn start(&mut self, sink: EventSink) -> Result<(), HotkeyError> {
        if self.thread.is_some() {
            return Err(HotkeyError::AlreadyRunning);
        }

        let devices = find_devices(self.capture_mouse)?;
        info!(count = devices.len(), "found input devices");
        for device in &devices {
            debug!(name = device.name().unwrap_or("unnamed"), "monitoring device");
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let capture_mouse = self.capture_mouse;

        let thread = thread::Builder::new()
            .name("hotkey-tap".to_string())
            .spawn(move || {
                if let Err(e) = runtime.block_on(capture_loop(devices, sink, capture_mouse, stop_rx)) {
                    error!(error = %e, "evdev capture failed");
                }
                HELD_MODIFIERS.store(0, Ordering::SeqCst);
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
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

/// Keyboards report `KEY_A`; pointers report `BTN_LEFT`
fn find_devices(capture_mouse: bool) -> Result<Vec<Device>, HotkeyError> {
    let devices: Vec<Device> = evdev::enumerate()
        .map(|(_, device)| device)
        .filter(|device| {
            device.supported_keys().is_some_and(|keys| {
                keys.contains(Key::KEY_A) || (capture_mouse && keys.contains(Key::BTN_LEFT))
            })
        })
        .collect();

    if devices.is_empty() {
        Err(HotkeyError::PermissionDenied(
            "no readable input devices in /dev/input; \
             add this user to the 'input' group and log in again"
                .into(),
        ))
    } else {
        Ok(devices)
    }
}

async fn capture_loop(
    devices: Vec<Device>,
    sink: EventSink,
    capture_mouse: bool,
    stop_rx: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let mut streams: SelectAll<evdev::EventStream> = SelectAll::new();
    for device in devices {
        streams.push(device.into_event_stream()?);
    }

    info!(capture_mouse, "evdev capture active");

    tokio::select! {
        _ = stop_rx => {
            info!("evdev capture stopped");
        }
        _ = async {
            while let Some(Ok(event)) = streams.next().await {
                if let Some(input) = translate(&event, capture_mouse) {
                    trace!(?input, "tap event");
                    track_modifier(input);
                    sink(input);
                }
            }
        } => {
            info!("all evdev streams ended");
        }
    }

    Ok(())
}

/// Value 1 is a press, 0 a release and 2 an autorepeat, which is delivered
/// as another press like the other platforms do.
fn translate(event: &evdev::InputEvent, capture_mouse: bool) -> Option<InputEvent> {
    let InputEventKind::Key(key) = event.kind() else {
        return None;
    };
    let pressed = match event.value() {
        1 | 2 => true,
        0 => false,
        _ => return None,
    };

    if let Some(button) = mouse_button(key.code()) {
        if !capture_mouse {
            return None;
        }
        return Some(if pressed {
            InputEvent::ButtonDown(button)
        } else {
            InputEvent::ButtonUp(button)
        });
    }

    let code = evdev_to_vk(key.code())?;
    Some(if pressed {
        InputEvent::KeyDown(code)
    } else {
        InputEvent::KeyUp(code)
    })
}

fn mouse_button(code: u16) -> Option<KeyCode> {
    match code {
        0x110 => Some(KeyCode::MOUSE_LEFT),
        0x111 => Some(KeyCode::MOUSE_RIGHT),
        0x112 => Some(KeyCode::MOUSE_MIDDLE),
        0x113 => Some(KeyCode::MOUSE_X1),
        0x114 => Some(KeyCode::MOUSE_X2),
        _ => None,
    }
}

const PHYSICAL_MODIFIERS: [KeyCode; 8] = [
    KeyCode::LEFT_SHIFT,
    KeyCode::RIGHT_SHIFT,
    KeyCode::LEFT_CONTROL,
    KeyCode::RIGHT_CONTROL,
    KeyCode::LEFT_ALT,
    KeyCode::RIGHT_ALT,
    KeyCode::LEFT_META,
    KeyCode::RIGHT_META,
];

fn track_modifier(input: InputEvent) {
    let Some(index) = PHYSICAL_MODIFIERS.iter().position(|key| *key == input.key()) else {
        return;
    };
    let bit = 1u16 << index;
    if input.is_press() {
        HELD_MODIFIERS.fetch_or(bit, Ordering::SeqCst);
    } else {
        HELD_MODIFIERS.fetch_and(!bit, Ordering::SeqCst);
    }
}

/// Map a Linux key code (input-event-codes.h) to the shared numbering
fn evdev_to_vk(code: u16) -> Option<KeyCode> {
    let vk = match code {
        1 => 0x1B,            // Esc
        2..=10 => code + 0x2F, // 1..9
        11 => 0x30,           // 0
        12 => 0xBD,           // -
        13 => 0xBB,           // =
        14 => 0x08,           // Backspace
        15 => 0x09,           // Tab
        16 => 0x51,           // Q
        17 => 0x57,           // W
        18 => 0x45,           // E
        19 => 0x52,           // R
        20 => 0x54,           // T
        21 => 0x59,           // Y
        22 => 0x55,           // U
        23 => 0x49,           // I
        24 => 0x4F,           // O
        25 => 0x50,           // P
        26 => 0xDB,           // [
        27 => 0xDD,           // ]
        28 => 0x0D,           // Enter
        29 => 0xA2,           // Left Ctrl
        30 => 0x41,           // A
        31 => 0x53,           // S
        32 => 0x44,           // D
        33 => 0x46,           // F
        34 => 0x47,           // G
        35 => 0x48,           // H
        36 => 0x4A,           // J
        37 => 0x4B,           // K
        38 => 0x4C,           // L
        39 => 0xBA,           // ;
        40 => 0xDE,           // '
        41 => 0xC0,           // `
        42 => 0xA0,           // Left Shift
        43 => 0xDC,           // \
        44 => 0x5A,           // Z
        45 => 0x58,           // X
        46 => 0x43,           // C
        47 => 0x56,           // V
        48 => 0x42,           // B
        49 => 0x4E,           // N
        50 => 0x4D,           // M
        51 => 0xBC,           // ,
        52 => 0xBE,           // .
        53 => 0xBF,           // /
        54 => 0xA1,           // Right Shift
        55 => 0x6A,           // Keypad *
        56 => 0xA4,           // Left Alt
        57 => 0x20,           // Space
        58 => 0x14,           // Caps Lock
        59..=68 => code + 0x35, // F1..F10
        69 => 0x90,           // Num Lock
        70 => 0x91,           // Scroll Lock
        71 => 0x67,           // Keypad 7
        72 => 0x68,
        73 => 0x69,
        74 => 0x6D,           // Keypad -
        75 => 0x64,           // Keypad 4
        76 => 0x65,
        77 => 0x66,
        78 => 0x6B,           // Keypad +
        79 => 0x61,           // Keypad 1
        80 => 0x62,
        81 => 0x63,
        82 => 0x60,           // Keypad 0
        83 => 0x6E,           // Keypad .
        87 => 0x7A,           // F11
        88 => 0x7B,           // F12
        96 => 0x0D,           // Keypad Enter
        97 => 0xA3,           // Right Ctrl
        98 => 0x6F,           // Keypad /
        99 => 0x2C,           // SysRq / Print Screen
        100 => 0xA5,          // Right Alt
        102 => 0x24,          // Home
        103 => 0x26,          // Up
        104 => 0x21,          // Page Up
        105 => 0x25,          // Left
        106 => 0x27,          // Right
        107 => 0x23,          // End
        108 => 0x28,          // Down
        109 => 0x22,          // Page Down
        110 => 0x2D,          // Insert
        111 => 0x2E,          // Delete
        119 => 0x13,          // Pause
        125 => 0x5B,          // Left Meta
        126 => 0x5C,          // Right Meta
        183..=194 => code - 183 + 0x7C, // F13..F24
        _ => return None,
    };
    Some(KeyCode(vk))
}

/// Modifiers held according to the tap's device reports
#[derive(Debug, Default)]
pub struct SystemModifiers;

impl SystemModifiers {
    pub fn new() -> Self {
        Self
    }
}

impl ModifierTracker for SystemModifiers {
    fn current_modifiers(&self) -> ModifierSet {
        let held = HELD_MODIFIERS.load(Ordering::SeqCst);
        PHYSICAL_MODIFIERS
            .iter()
            .enumerate()
            .filter(|(index, _)| held & (1 << index) != 0)
            .filter_map(|(_, key)| key.modifier())
            .fold(ModifierSet::NONE, |set, kind: ModifierKind| set | kind)
    }
}
