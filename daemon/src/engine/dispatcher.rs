//! Single-consumer event loop for the hotkey engine
//!
//! Input from the tap thread, dwell ticks and control commands all arrive on
//! one unbounded queue. Live modifiers are sampled on the tap thread as each
//! event is seen, so a backlog cannot make them stale. The dispatcher is the only owner of the bindings, the
//! Hold latch, the recording session and the tap, so none of them need locks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::events::HotkeyEvent;
use crate::hotkey::{HotkeyListener, InputEvent, ModifierSet, ModifierTracker};

use super::binding::{Binding, BindingSlot};
use super::matcher::BindingMatcher;
use super::recording::{Effect, RecordingSession};
use super::ticker::DwellTicker;

/// Everything the dispatcher consumes
#[derive(Debug)]
pub enum EngineMessage {
    /// A transition reported by the input tap, with the modifiers held
    /// when the tap saw it
    Input {
        event: InputEvent,
        modifiers: ModifierSet,
    },
    /// A dwell timer tick
    Tick { generation: u64 },
    /// A control request
    Command(Command),
}

/// Control requests accepted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace both bindings
    ConfigureBindings { toggle: Binding, hold: Binding },
    /// Replace one binding
    SetBinding { slot: BindingSlot, binding: Binding },
    /// Enter or leave recording. With a slot, the captured binding is
    /// installed there.
    SetRecording {
        active: bool,
        slot: Option<BindingSlot>,
    },
    /// Install the input tap, replacing any previous one
    StartTap,
    /// Remove the input tap
    StopTap,
    /// Leave the run loop
    Shutdown,
}

/// Snapshot of engine state published on every change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub hooked: bool,
    pub recording: bool,
    pub toggle: Binding,
    pub hold: Binding,
    pub hold_active: bool,
}

/// The engine's run loop has ended
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("hotkey engine is not running")]
pub struct EngineStopped;

/// Cloneable sender for engine commands
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) -> Result<(), EngineStopped> {
        self.tx
            .send(EngineMessage::Command(command))
            .map_err(|_| EngineStopped)
    }
}

/// Routes input to the recording session or the binding matcher
pub struct Dispatcher {
    listener: HotkeyListener,
    tracker: Arc<dyn ModifierTracker>,
    matcher: BindingMatcher,
    recording: RecordingSession,
    /// Slot that receives the binding captured by the current recording
    record_slot: Option<BindingSlot>,
    ticker: DwellTicker,
    tx: mpsc::UnboundedSender<EngineMessage>,
    events: broadcast::Sender<HotkeyEvent>,
    status: watch::Sender<EngineStatus>,
}

impl Dispatcher {
    /// Create a dispatcher and the queue it will consume
    pub fn new(
        listener: HotkeyListener,
        tracker: Arc<dyn ModifierTracker>,
        events: broadcast::Sender<HotkeyEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(EngineStatus::default());

        let dispatcher = Self {
            listener,
            tracker,
            matcher: BindingMatcher::new(),
            recording: RecordingSession::new(),
            record_slot: None,
            ticker: DwellTicker::new(),
            tx,
            events,
            status,
        };
        (dispatcher, rx)
    }

    /// Sender for control commands
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Receiver for status snapshots
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Process messages until a `Shutdown` command arrives
    pub async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<EngineMessage>) {
        info!("hotkey engine started");

        while let Some(message) = rx.recv().await {
            match message {
                EngineMessage::Input { event, modifiers } => self.handle_input(event, modifiers),
                EngineMessage::Tick { generation } => self.handle_tick(generation),
                EngineMessage::Command(Command::Shutdown) => break,
                EngineMessage::Command(command) => self.handle_command(command),
            }
        }

        self.shutdown();
        info!("hotkey engine stopped");
    }

    /// Remove the tap and stop every timer. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let effects = self.recording.stop();
        self.apply(effects);
        self.record_slot = None;
        self.ticker.cancel();
        self.listener.stop();
        self.publish_status();
    }

    fn handle_input(&mut self, event: InputEvent, live: ModifierSet) {
        // Events queued before the tap was removed
        if !self.listener.is_hooked() {
            return;
        }
        trace!(?event, %live, "input");

        if self.recording.is_active() {
            trace!(phase = ?self.recording.phase(), "recording input");
            let effects = self.recording.on_input(event, live, Instant::now());
            self.apply(effects);
            return;
        }

        let outcome = if event.is_press() {
            self.matcher.on_press(event.key(), live)
        } else {
            self.matcher.on_release(event.key())
        };

        if let Some(hotkey) = outcome {
            self.emit(hotkey);
            self.publish_status();
        }
    }

    fn handle_tick(&mut self, generation: u64) {
        let live = self.tracker.current_modifiers();
        let effects = self.recording.on_tick(generation, live, Instant::now());
        self.apply(effects);
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "engine command");
        match command {
            Command::ConfigureBindings { toggle, hold } => {
                self.matcher.configure(toggle, hold);
                info!(%toggle, %hold, "bindings configured");
            }
            Command::SetBinding { slot, binding } => {
                self.matcher.set(slot, binding);
                info!(%slot, %binding, "binding updated");
            }
            Command::SetRecording { active: true, slot } => {
                let effects = self.recording.start();
                self.apply(effects);
                self.record_slot = slot;
                info!(?slot, "recording started");
            }
            Command::SetRecording { active: false, .. } => {
                if self.recording.is_active() {
                    let effects = self.recording.stop();
                    self.apply(effects);
                    info!("recording cancelled");
                }
                self.record_slot = None;
            }
            Command::StartTap => self.start_tap(),
            Command::StopTap => {
                self.listener.stop();
                self.matcher.reset_hold();
                if self.recording.is_active() {
                    // Re-arm so a dwell cannot finish without input
                    let effects = self.recording.start();
                    self.apply(effects);
                }
            }
            Command::Shutdown => {}
        }
        self.publish_status();
    }

    fn start_tap(&mut self) {
        let tx = self.tx.clone();
        let tracker = Arc::clone(&self.tracker);
        let sink = Box::new(move |event: InputEvent| {
            let modifiers = tracker.current_modifiers();
            let _ = tx.send(EngineMessage::Input { event, modifiers });
        });

        self.matcher.reset_hold();
        if let Err(e) = self.listener.start(sink) {
            warn!(error = %e, "hotkeys unavailable until the tap is restarted");
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => self.emit(event),
                Effect::StartDwell { generation } => {
                    self.ticker.start(generation, self.tx.clone());
                }
                Effect::CancelDwell => self.ticker.cancel(),
                Effect::Captured(binding) => self.captured(binding),
            }
        }
    }

    fn captured(&mut self, binding: Binding) {
        info!(%binding, "binding captured");
        if let Some(slot) = self.record_slot.take() {
            let mode = self.matcher.binding(slot).mode;
            self.matcher.set(slot, binding.with_mode(mode));
            info!(%slot, "captured binding installed");
        }
        self.emit(HotkeyEvent::BindingCaptured {
            key_code: binding.key_code(),
            modifiers: binding.modifiers,
        });
        self.publish_status();
    }

    fn emit(&self, event: HotkeyEvent) {
        debug!(%event, "engine event");
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        let next = EngineStatus {
            hooked: self.listener.is_hooked(),
            recording: self.recording.is_active(),
            toggle: self.matcher.binding(BindingSlot::Toggle),
            hold: self.matcher.binding(BindingSlot::Hold),
            hold_active: self.matcher.hold_active(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::task::JoinHandle;
    use tokio::time;

    use super::*;
    use crate::engine::binding::MatchMode;
    use crate::hotkey::{
        KeyCode, ModifierKind, ModifierSet, ScriptedModifiers, SyntheticInput, SyntheticSource,
    };

    const CTRL: ModifierKind = ModifierKind::Ctrl;
    const SHIFT: ModifierKind = ModifierKind::Shift;
    const ALT: ModifierKind = ModifierKind::Alt;
    const KEY_K: KeyCode = KeyCode(0x4B);
    const KEY_M: KeyCode = KeyCode(0x4D);

    struct Harness {
        input: SyntheticInput,
        modifiers: ScriptedModifiers,
        engine: EngineHandle,
        events: broadcast::Receiver<HotkeyEvent>,
        status: watch::Receiver<EngineStatus>,
        task: JoinHandle<Dispatcher>,
    }

    impl Harness {
        async fn new() -> Self {
            let (source, input) = SyntheticSource::new();
            let modifiers = ScriptedModifiers::new();
            let (events_tx, events) = broadcast::channel(256);
            let (mut dispatcher, rx) = Dispatcher::new(
                HotkeyListener::new(Box::new(source)),
                Arc::new(modifiers.clone()),
                events_tx,
            );
            let engine = dispatcher.handle();
            let status = dispatcher.status();
            let task = tokio::spawn(async move {
                dispatcher.run(rx).await;
                dispatcher
            });

            let harness = Self {
                input,
                modifiers,
                engine,
                events,
                status,
                task,
            };
            harness.command(Command::StartTap).await;
            harness
        }

        async fn command(&self, command: Command) {
            self.engine.send(command).unwrap();
            settle().await;
        }

        async fn send(&self, event: InputEvent) {
            self.input.send(event);
            settle().await;
        }

        fn drain(&mut self) -> Vec<HotkeyEvent> {
            let mut out = Vec::new();
            loop {
                match self.events.try_recv() {
                    Ok(event) => out.push(event),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => return out,
                }
            }
        }

        fn status(&self) -> EngineStatus {
            self.status.borrow().clone()
        }
    }

    /// Let the dispatcher drain its queue; advances paused time by 1ms
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    fn captures(events: &[HotkeyEvent]) -> Vec<(KeyCode, ModifierSet)> {
        events
            .iter()
            .filter_map(|event| match event {
                HotkeyEvent::BindingCaptured { key_code, modifiers } => Some((*key_code, *modifiers)),
                _ => None,
            })
            .collect()
    }

    fn progress(events: &[HotkeyEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|event| match event {
                HotkeyEvent::HoldProgress { fraction } => Some(*fraction),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_fires_once_per_press() {
        let mut h = Harness::new().await;
        h.command(Command::ConfigureBindings {
            toggle: Binding::default(),
            hold: Binding::key(KEY_K, ModifierSet::NONE),
        })
        .await;

        for _ in 0..3 {
            h.send(InputEvent::KeyDown(KEY_K)).await;
        }
        assert!(h.status().hold_active);
        h.send(InputEvent::KeyUp(KEY_K)).await;

        assert_eq!(h.drain(), vec![HotkeyEvent::HoldPressed, HotkeyEvent::HoldReleased]);
        assert!(!h.status().hold_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_wins_over_toggle_on_shared_key() {
        let mut h = Harness::new().await;
        let binding = Binding::key(KEY_M, ModifierSet::from(CTRL));
        h.command(Command::ConfigureBindings {
            toggle: binding,
            hold: binding,
        })
        .await;

        h.modifiers.set(&[CTRL]);
        h.send(InputEvent::KeyDown(KEY_M)).await;

        assert_eq!(h.drain(), vec![HotkeyEvent::HoldPressed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_fires_on_each_press() {
        let mut h = Harness::new().await;
        h.command(Command::SetBinding {
            slot: BindingSlot::Toggle,
            binding: Binding::key(KEY_M, ModifierSet::of(&[CTRL, ALT])),
        })
        .await;

        h.modifiers.set(&[CTRL, ALT]);
        h.send(InputEvent::KeyDown(KEY_M)).await;
        h.send(InputEvent::KeyUp(KEY_M)).await;
        h.send(InputEvent::KeyDown(KEY_M)).await;

        assert_eq!(
            h.drain(),
            vec![HotkeyEvent::HotkeyPressed, HotkeyEvent::HotkeyPressed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_modifiers_are_read_when_the_tap_sees_the_key() {
        let mut h = Harness::new().await;
        h.command(Command::SetBinding {
            slot: BindingSlot::Toggle,
            binding: Binding::key(KEY_M, ModifierSet::from(CTRL)),
        })
        .await;

        // Ctrl is released before the engine gets to the queued M
        h.modifiers.set(&[CTRL]);
        h.input.send(InputEvent::KeyDown(KEY_M));
        h.modifiers.set(&[]);
        h.input.send(InputEvent::KeyUp(KeyCode::LEFT_CONTROL));
        settle().await;

        assert_eq!(h.drain(), vec![HotkeyEvent::HotkeyPressed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_modifier_hold_resets_progress() {
        let mut h = Harness::new().await;
        h.command(Command::SetRecording {
            active: true,
            slot: None,
        })
        .await;

        h.send(InputEvent::KeyDown(KeyCode::LEFT_CONTROL)).await;
        h.send(InputEvent::KeyDown(KeyCode::LEFT_SHIFT)).await;
        time::sleep(Duration::from_millis(500)).await;
        h.send(InputEvent::KeyUp(KeyCode::LEFT_SHIFT)).await;
        time::sleep(Duration::from_secs(2)).await;

        let events = h.drain();
        assert!(captures(&events).is_empty());

        let fractions = progress(&events);
        let (last, ticks) = fractions.split_last().unwrap();
        assert_eq!(*last, 0.0);
        assert!(ticks.len() >= 8);
        assert!(ticks.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(ticks.iter().all(|fraction| *fraction > 0.0 && *fraction < 1.0));

        assert_eq!(
            events.last(),
            Some(&HotkeyEvent::ModifiersChanged {
                modifiers: ModifierSet::from(CTRL)
            })
        );
        assert!(h.status().recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_modifier_dwell_captures_modifier_only_binding() {
        let mut h = Harness::new().await;
        h.command(Command::SetRecording {
            active: true,
            slot: Some(BindingSlot::Toggle),
        })
        .await;

        h.send(InputEvent::KeyDown(KeyCode::LEFT_CONTROL)).await;
        h.send(InputEvent::KeyDown(KeyCode::LEFT_ALT)).await;
        time::sleep(Duration::from_millis(1500)).await;

        let events = h.drain();
        assert_eq!(
            captures(&events),
            vec![(KeyCode::NONE, ModifierSet::of(&[CTRL, ALT]))]
        );
        let fractions = progress(&events);
        assert_eq!(fractions[fractions.len() - 2..], [1.0, 0.0]);

        let status = h.status();
        assert!(!status.recording);
        assert_eq!(status.toggle, Binding::modifier_only(ModifierSet::of(&[CTRL, ALT])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chord_during_dwell_captures_once() {
        let mut h = Harness::new().await;
        h.command(Command::SetRecording {
            active: true,
            slot: None,
        })
        .await;

        h.send(InputEvent::KeyDown(KeyCode::LEFT_CONTROL)).await;
        h.send(InputEvent::KeyDown(KeyCode::LEFT_SHIFT)).await;
        time::sleep(Duration::from_millis(300)).await;
        h.modifiers.set(&[CTRL, SHIFT]);
        h.send(InputEvent::KeyDown(KEY_K)).await;
        time::sleep(Duration::from_secs(2)).await;

        let events = h.drain();
        assert_eq!(captures(&events), vec![(KEY_K, ModifierSet::of(&[CTRL, SHIFT]))]);
        assert_eq!(progress(&events).last(), Some(&0.0));
        assert!(matches!(events.last(), Some(HotkeyEvent::BindingCaptured { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_left_click_released_early_captures_nothing() {
        let mut h = Harness::new().await;
        h.command(Command::SetRecording {
            active: true,
            slot: None,
        })
        .await;

        h.send(InputEvent::ButtonDown(KeyCode::MOUSE_LEFT)).await;
        time::sleep(Duration::from_millis(400)).await;
        h.send(InputEvent::ButtonUp(KeyCode::MOUSE_LEFT)).await;
        time::sleep(Duration::from_secs(2)).await;

        let events = h.drain();
        assert!(captures(&events).is_empty());
        assert_eq!(progress(&events).last(), Some(&0.0));
        assert!(h.status().recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_left_click_held_captures_button() {
        let mut h = Harness::new().await;
        h.command(Command::SetRecording {
            active: true,
            slot: None,
        })
        .await;

        h.modifiers.set(&[ALT]);
        h.send(InputEvent::ButtonDown(KeyCode::MOUSE_LEFT)).await;
        time::sleep(Duration::from_millis(1200)).await;
        h.send(InputEvent::ButtonUp(KeyCode::MOUSE_LEFT)).await;

        let events = h.drain();
        assert_eq!(captures(&events), vec![(KeyCode::MOUSE_LEFT, ModifierSet::from(ALT))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorded_binding_is_live_after_capture() {
        let mut h = Harness::new().await;
        h.command(Command::SetBinding {
            slot: BindingSlot::Hold,
            binding: Binding::key(KEY_K, ModifierSet::NONE).with_mode(MatchMode::Exact),
        })
        .await;
        h.command(Command::SetRecording {
            active: true,
            slot: Some(BindingSlot::Hold),
        })
        .await;

        h.send(InputEvent::ButtonDown(KeyCode::MOUSE_X1)).await;
        h.send(InputEvent::ButtonUp(KeyCode::MOUSE_X1)).await;
        let status = h.status();
        assert!(!status.recording);
        assert_eq!(
            status.hold,
            Binding::key(KeyCode::MOUSE_X1, ModifierSet::NONE).with_mode(MatchMode::Exact)
        );
        h.drain();

        h.send(InputEvent::ButtonDown(KeyCode::MOUSE_X1)).await;
        h.send(InputEvent::ButtonUp(KeyCode::MOUSE_X1)).await;
        assert_eq!(h.drain(), vec![HotkeyEvent::HoldPressed, HotkeyEvent::HoldReleased]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_recording_discards_dwell() {
        let mut h = Harness::new().await;
        h.command(Command::SetRecording {
            active: true,
            slot: Some(BindingSlot::Toggle),
        })
        .await;

        h.send(InputEvent::KeyDown(KeyCode::LEFT_CONTROL)).await;
        h.send(InputEvent::KeyDown(KeyCode::LEFT_ALT)).await;
        time::sleep(Duration::from_millis(200)).await;
        h.command(Command::SetRecording {
            active: false,
            slot: None,
        })
        .await;
        time::sleep(Duration::from_secs(2)).await;

        let events = h.drain();
        assert!(captures(&events).is_empty());
        assert_eq!(progress(&events).last(), Some(&0.0));
        assert_eq!(h.status().toggle, Binding::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarting_tap_leaves_one_hook() {
        let mut h = Harness::new().await;
        h.command(Command::SetBinding {
            slot: BindingSlot::Toggle,
            binding: Binding::key(KEY_M, ModifierSet::NONE),
        })
        .await;

        h.command(Command::StopTap).await;
        assert!(!h.status().hooked);
        h.command(Command::StartTap).await;
        h.command(Command::StartTap).await;
        assert_eq!(h.input.installed(), 1);
        assert!(h.status().hooked);

        h.send(InputEvent::KeyDown(KEY_M)).await;
        assert_eq!(h.drain(), vec![HotkeyEvent::HotkeyPressed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_install_reports_not_hooked() {
        let mut h = Harness::new().await;
        h.command(Command::SetBinding {
            slot: BindingSlot::Toggle,
            binding: Binding::key(KEY_M, ModifierSet::NONE),
        })
        .await;

        h.input.deny_next_install();
        h.command(Command::StartTap).await;
        assert!(!h.status().hooked);
        h.send(InputEvent::KeyDown(KEY_M)).await;
        assert!(h.drain().is_empty());

        h.command(Command::StartTap).await;
        assert!(h.status().hooked);
        h.send(InputEvent::KeyDown(KEY_M)).await;
        assert_eq!(h.drain(), vec![HotkeyEvent::HotkeyPressed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_removes_tap() {
        let h = Harness::new().await;
        assert_eq!(h.input.installed(), 1);

        h.engine.send(Command::Shutdown).unwrap();
        let dispatcher = h.task.await.unwrap();

        assert_eq!(h.input.installed(), 0);
        assert!(!dispatcher.listener.is_hooked());
        assert!(!dispatcher.ticker.is_running());
    }
}
