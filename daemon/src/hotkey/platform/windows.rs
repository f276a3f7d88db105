//! Global input tap using low-level Windows hooks
//!
//! `start()` spawns a thread that installs `WH_KEYBOARD_LL` (and
//! `WH_MOUSE_LL` when mouse capture is enabled) and runs the `GetMessageW`
//! loop the hooks need. Every event is passed on with `CallNextHookEx`; the
//! daemon only observes.
//!
//! Low-level hook procs receive no user data pointer, so the sink lives in a
//! process-global. Only one tap may be active at a time.

use std::ptr;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use tracing::{info, trace};
use windows_sys::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::Threading::GetCurrentThreadId;
use windows_sys::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetMessageW, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx,
    HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT, WH_KEYBOARD_LL, WH_MOUSE_LL,
    WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_QUIT,
    WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_XBUTTONDOWN, WM_XBUTTONUP,
};

use crate::hotkey::keys::{KeyCode, ModifierKind, ModifierSet};
use crate::hotkey::listener::{EventSink, EventSource, HotkeyError, InputEvent};
use crate::hotkey::tracker::ModifierTracker;

/// Sink for the active hook procs
static HOOK_SINK: Mutex<Option<EventSink>> = Mutex::new(None);

/// Low-level hook event source
pub struct PlatformTap {
    capture_mouse: bool,
    /// Thread ID of the message-loop thread, for posting `WM_QUIT`
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
}

impl PlatformTap {
    pub fn new(capture_mouse: bool) -> Self {
        Self {
            capture_mouse,
            thread_id: 0,
            thread: None,
        }
    }
}

impl EventSource for PlatformTap {
    fn start(&mut self, sink: EventSink) -> Result<(), HotkeyError> {
        if self.thread.is_some() {
            return Err(HotkeyError::AlreadyRunning);
        }

        {
            let mut guard = HOOK_SINK
                .lock()
                .map_err(|_| HotkeyError::HookInstall("sink mutex poisoned".into()))?;
            *guard = Some(sink);
        }

        let capture_mouse = self.capture_mouse;
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, HotkeyError>>();

        let thread = thread::Builder::new()
            .name("hotkey-tap".to_string())
            .spawn(move || run_message_loop(capture_mouse, &ready_tx))
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                self.thread_id = thread_id;
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                clear_sink();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                clear_sink();
                Err(HotkeyError::HookInstall(
                    "hook thread exited before reporting status".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if self.thread_id != 0 {
            unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, 0, 0) };
            self.thread_id = 0;
        }
        // The hook thread unhooks before exiting, so joining makes removal synchronous
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        clear_sink();
    }
}

impl Drop for PlatformTap {
    fn drop(&mut self) {
        self.stop();
    }
}

fn clear_sink() {
    if let Ok(mut guard) = HOOK_SINK.lock() {
        *guard = None;
    }
}

/// Install the hooks on this thread and pump messages until `WM_QUIT`
fn run_message_loop(capture_mouse: bool, ready: &mpsc::Sender<Result<u32, HotkeyError>>) {
    let keyboard: HHOOK =
        unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), ptr::null_mut(), 0) };
    if keyboard.is_null() {
        let _ = ready.send(Err(HotkeyError::HookInstall(
            "SetWindowsHookExW(WH_KEYBOARD_LL) failed".into(),
        )));
        return;
    }

    let mouse: HHOOK = if capture_mouse {
        let hook = unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_proc), ptr::null_mut(), 0) };
        if hook.is_null() {
            unsafe { UnhookWindowsHookEx(keyboard) };
            let _ = ready.send(Err(HotkeyError::HookInstall(
                "SetWindowsHookExW(WH_MOUSE_LL) failed".into(),
            )));
            return;
        }
        hook
    } else {
        ptr::null_mut()
    };

    let thread_id = unsafe { GetCurrentThreadId() };
    let _ = ready.send(Ok(thread_id));
    info!(capture_mouse, "low-level hooks installed");

    // Returns 0 on WM_QUIT and -1 on error; both end the loop
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        while GetMessageW(&mut msg, ptr::null_mut(), 0, 0) > 0 {}
    }

    unsafe {
        UnhookWindowsHookEx(keyboard);
        if !mouse.is_null() {
            UnhookWindowsHookEx(mouse);
        }
    }
    info!("low-level hooks removed");
}

fn deliver(event: InputEvent) {
    trace!(?event, "hook event");
    if let Ok(guard) = HOOK_SINK.lock() {
        if let Some(sink) = guard.as_ref() {
            sink(event);
        }
    }
}

unsafe extern "system" fn keyboard_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        let kb = &*(l_param as *const KBDLLHOOKSTRUCT);
        if let Ok(code) = u16::try_from(kb.vkCode) {
            let key = KeyCode(code);
            if (1..=0xFE).contains(&code) && !key.is_mouse_button() {
                match w_param as u32 {
                    WM_KEYDOWN | WM_SYSKEYDOWN => deliver(InputEvent::KeyDown(key)),
                    WM_KEYUP | WM_SYSKEYUP => deliver(InputEvent::KeyUp(key)),
                    _ => {}
                }
            }
        }
    }
    CallNextHookEx(ptr::null_mut(), n_code, w_param, l_param)
}

unsafe extern "system" fn mouse_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        let message = w_param as u32;
        let event = match message {
            WM_LBUTTONDOWN => Some(InputEvent::ButtonDown(KeyCode::MOUSE_LEFT)),
            WM_LBUTTONUP => Some(InputEvent::ButtonUp(KeyCode::MOUSE_LEFT)),
            WM_RBUTTONDOWN => Some(InputEvent::ButtonDown(KeyCode::MOUSE_RIGHT)),
            WM_RBUTTONUP => Some(InputEvent::ButtonUp(KeyCode::MOUSE_RIGHT)),
            WM_MBUTTONDOWN => Some(InputEvent::ButtonDown(KeyCode::MOUSE_MIDDLE)),
            WM_MBUTTONUP => Some(InputEvent::ButtonUp(KeyCode::MOUSE_MIDDLE)),
            WM_XBUTTONDOWN | WM_XBUTTONUP => {
                let ms = &*(l_param as *const MSLLHOOKSTRUCT);
                let button = x_button(ms.mouseData);
                if message == WM_XBUTTONDOWN {
                    Some(InputEvent::ButtonDown(button))
                } else {
                    Some(InputEvent::ButtonUp(button))
                }
            }
            _ => None,
        };
        if let Some(event) = event {
            deliver(event);
        }
    }
    CallNextHookEx(ptr::null_mut(), n_code, w_param, l_param)
}

/// The high word of `mouseData` names the X button
fn x_button(mouse_data: u32) -> KeyCode {
    if (mouse_data >> 16) & 0xFFFF == 2 {
        KeyCode::MOUSE_X2
    } else {
        KeyCode::MOUSE_X1
    }
}

/// Live modifier state from `GetAsyncKeyState`
#[derive(Debug, Default)]
pub struct SystemModifiers;

impl SystemModifiers {
    pub fn new() -> Self {
        Self
    }
}

fn any_down(codes: &[KeyCode]) -> bool {
    codes
        .iter()
        .any(|key| unsafe { GetAsyncKeyState(i32::from(key.code())) } as u16 & 0x8000 != 0)
}

impl ModifierTracker for SystemModifiers {
    fn current_modifiers(&self) -> ModifierSet {
        let mut set = ModifierSet::NONE;
        if any_down(&[KeyCode::SHIFT, KeyCode::LEFT_SHIFT, KeyCode::RIGHT_SHIFT]) {
            set.insert(ModifierKind::Shift);
        }
        if any_down(&[KeyCode::CONTROL, KeyCode::LEFT_CONTROL, KeyCode::RIGHT_CONTROL]) {
            set.insert(ModifierKind::Ctrl);
        }
        if any_down(&[KeyCode::ALT, KeyCode::LEFT_ALT, KeyCode::RIGHT_ALT]) {
            set.insert(ModifierKind::Alt);
        }
        if any_down(&[KeyCode::LEFT_META, KeyCode::RIGHT_META]) {
            set.insert(ModifierKind::Meta);
        }
        set
    }
}
