//! Interactive capture of a new binding from raw input
//!
//! Phases: Idle -> Armed -> CollectingModifiers <-> AwaitingDwell -> Captured -> Idle.
//!
//! Two kinds of input are ambiguous on their own and need a dwell window
//! before they count: a bare modifier combination (the user may still be
//! reaching for a key) and a left/right click (an everyday action). The
//! session never owns a timer. It asks the dispatcher to start or cancel
//! one and consumes the generation-tagged ticks that come back, so a tick
//! from a cancelled timer is recognized and dropped.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::events::HotkeyEvent;
use crate::hotkey::{InputEvent, KeyCode, ModifierSet};

use super::binding::Binding;

/// Interval between dwell progress reports
pub const DWELL_TICK: Duration = Duration::from_millis(50);

/// Continuous hold required before a dwell commits
pub const DWELL_THRESHOLD: Duration = Duration::from_secs(1);

/// Where the session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    CollectingModifiers,
    AwaitingDwell,
}

/// What the dispatcher must do after feeding the session
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish an event
    Emit(HotkeyEvent),
    /// Start a dwell ticker whose ticks carry `generation`
    StartDwell { generation: u64 },
    /// Stop the running dwell ticker
    CancelDwell,
    /// A binding was captured and the session has ended
    Captured(Binding),
}

/// Data collected while recording
#[derive(Debug, Clone, Copy, Default)]
struct RecordingState {
    accumulated: ModifierSet,
    hold_started: Option<Instant>,
    /// Left/right button whose dwell is running, if the dwell is a click-hold
    pending_button: Option<KeyCode>,
}

impl RecordingState {
    fn dwell_running(&self) -> bool {
        self.hold_started.is_some()
    }
}

/// Recording state machine
#[derive(Debug, Default)]
pub struct RecordingSession {
    state: Option<RecordingState>,
    generation: u64,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            None => Phase::Idle,
            Some(state) if state.dwell_running() => Phase::AwaitingDwell,
            Some(state) if state.accumulated.is_empty() => Phase::Armed,
            Some(_) => Phase::CollectingModifiers,
        }
    }

    /// Arm the session, discarding anything collected so far
    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel_dwell(&mut effects);
        self.state = Some(RecordingState::default());
        debug!("recording armed");
        effects
    }

    /// Leave recording without capturing
    pub fn stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel_dwell(&mut effects);
        self.state = None;
        effects
    }

    /// Feed one input transition. `live` is the platform's current modifier state.
    pub fn on_input(&mut self, event: InputEvent, live: ModifierSet, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(mut state) = self.state else {
            return effects;
        };

        match event {
            InputEvent::KeyDown(key) => match key.modifier() {
                Some(kind) => {
                    let before = state.accumulated.count();
                    state.accumulated.insert(kind);
                    if before < 2 && state.accumulated.count() >= 2 && !state.dwell_running() {
                        state.hold_started = Some(now);
                        effects.push(self.begin_dwell());
                    }
                    self.state = Some(state);
                    effects.push(Effect::Emit(HotkeyEvent::ModifiersChanged {
                        modifiers: state.accumulated,
                    }));
                }
                None => {
                    let binding = Binding::key(key, state.accumulated | live);
                    self.capture(binding, &mut effects);
                }
            },

            InputEvent::KeyUp(key) => {
                if let Some(kind) = key.modifier() {
                    state.accumulated.remove(kind);
                    self.state = Some(state);
                    let modifier_dwell = state.dwell_running() && state.pending_button.is_none();
                    if modifier_dwell && state.accumulated.count() < 2 {
                        self.cancel_dwell(&mut effects);
                    }
                    effects.push(Effect::Emit(HotkeyEvent::ModifiersChanged {
                        modifiers: state.accumulated,
                    }));
                }
            }

            InputEvent::ButtonDown(button) if button.needs_dwell() => {
                self.cancel_dwell(&mut effects);
                if let Some(state) = self.state.as_mut() {
                    state.hold_started = Some(now);
                    state.pending_button = Some(button);
                }
                effects.push(self.begin_dwell());
            }

            InputEvent::ButtonDown(button) => {
                let binding = Binding::key(button, state.accumulated | live);
                self.capture(binding, &mut effects);
            }

            InputEvent::ButtonUp(button) => {
                if state.pending_button == Some(button) {
                    debug!(%button, "button released before dwell threshold");
                    self.cancel_dwell(&mut effects);
                }
            }
        }

        effects
    }

    /// Advance the dwell identified by `generation`
    pub fn on_tick(&mut self, generation: u64, live: ModifierSet, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if generation != self.generation {
            return effects;
        }
        let Some(state) = self.state else {
            return effects;
        };
        let Some(started) = state.hold_started else {
            return effects;
        };

        let elapsed = now.saturating_duration_since(started);
        let fraction = (elapsed.as_secs_f64() / DWELL_THRESHOLD.as_secs_f64()).min(1.0);
        effects.push(Effect::Emit(HotkeyEvent::HoldProgress { fraction }));

        if elapsed >= DWELL_THRESHOLD {
            let binding = match state.pending_button {
                Some(button) => Binding::key(button, state.accumulated | live),
                None => Binding::modifier_only(state.accumulated),
            };
            self.capture(binding, &mut effects);
        }

        effects
    }

    fn begin_dwell(&mut self) -> Effect {
        self.generation += 1;
        Effect::StartDwell {
            generation: self.generation,
        }
    }

    /// Stop any running dwell; a stopped dwell reports progress 0
    fn cancel_dwell(&mut self, effects: &mut Vec<Effect>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.hold_started.take().is_some() {
            state.pending_button = None;
            self.generation += 1;
            effects.push(Effect::CancelDwell);
            effects.push(Effect::Emit(HotkeyEvent::HoldProgress { fraction: 0.0 }));
        }
    }

    fn capture(&mut self, binding: Binding, effects: &mut Vec<Effect>) {
        self.cancel_dwell(effects);
        self.state = None;
        debug!(%binding, "binding captured");
        effects.push(Effect::Captured(binding));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::ModifierKind;

    const CTRL: ModifierKind = ModifierKind::Ctrl;
    const SHIFT: ModifierKind = ModifierKind::Shift;
    const ALT: ModifierKind = ModifierKind::Alt;
    const KEY_K: KeyCode = KeyCode(0x4B);

    fn started(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|effect| match effect {
            Effect::StartDwell { generation } => Some(*generation),
            _ => None,
        })
    }

    fn captured(effects: &[Effect]) -> Vec<Binding> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Captured(binding) => Some(*binding),
                _ => None,
            })
            .collect()
    }

    fn progress(effects: &[Effect]) -> Vec<f64> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Emit(HotkeyEvent::HoldProgress { fraction }) => Some(*fraction),
                _ => None,
            })
            .collect()
    }

    fn armed() -> RecordingSession {
        let mut session = RecordingSession::new();
        assert!(session.start().is_empty());
        session
    }

    #[test]
    fn test_inactive_session_ignores_input() {
        let mut session = RecordingSession::new();
        let effects = session.on_input(InputEvent::KeyDown(KEY_K), ModifierSet::NONE, Instant::now());
        assert!(effects.is_empty());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_phases() {
        let now = Instant::now();
        let mut session = armed();
        assert_eq!(session.phase(), Phase::Armed);

        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, now);
        assert_eq!(session.phase(), Phase::CollectingModifiers);

        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, now);
        assert_eq!(session.phase(), Phase::AwaitingDwell);

        session.on_input(InputEvent::KeyUp(KeyCode::LEFT_SHIFT), ModifierSet::NONE, now);
        assert_eq!(session.phase(), Phase::CollectingModifiers);

        session.stop();
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_second_modifier_starts_dwell_once() {
        let now = Instant::now();
        let mut session = armed();

        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, now);
        assert_eq!(
            effects,
            vec![Effect::Emit(HotkeyEvent::ModifiersChanged {
                modifiers: ModifierSet::from(CTRL)
            })]
        );

        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, now);
        assert!(started(&effects).is_some());

        // A third modifier or a key repeat does not restart it
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_ALT), ModifierSet::NONE, now);
        assert!(started(&effects).is_none());
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, now);
        assert!(started(&effects).is_none());
    }

    #[test]
    fn test_short_modifier_hold_resets_without_capture() {
        let start = Instant::now();
        let mut session = armed();
        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, start);
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, start);
        let generation = started(&effects).unwrap();

        let mut seen = Vec::new();
        for tick in 1..=10 {
            let effects = session.on_tick(generation, ModifierSet::NONE, start + DWELL_TICK * tick);
            assert!(captured(&effects).is_empty());
            seen.extend(progress(&effects));
        }
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(seen.iter().all(|fraction| *fraction < 1.0));

        let effects = session.on_input(
            InputEvent::KeyUp(KeyCode::LEFT_SHIFT),
            ModifierSet::NONE,
            start + Duration::from_millis(520),
        );
        assert!(effects.contains(&Effect::CancelDwell));
        assert_eq!(progress(&effects), vec![0.0]);
        assert!(captured(&effects).is_empty());

        // The cancelled dwell's ticks are stale
        let effects = session.on_tick(generation, ModifierSet::NONE, start + DWELL_THRESHOLD);
        assert!(effects.is_empty());
        assert!(session.is_active());
    }

    #[test]
    fn test_modifier_dwell_captures_modifier_only_binding() {
        let start = Instant::now();
        let mut session = armed();
        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, start);
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::RIGHT_ALT), ModifierSet::NONE, start);
        let generation = started(&effects).unwrap();

        let effects = session.on_tick(generation, ModifierSet::NONE, start + DWELL_THRESHOLD);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(HotkeyEvent::HoldProgress { fraction: 1.0 }),
                Effect::CancelDwell,
                Effect::Emit(HotkeyEvent::HoldProgress { fraction: 0.0 }),
                Effect::Captured(Binding::modifier_only(ModifierSet::of(&[CTRL, ALT]))),
            ]
        );
        assert!(!session.is_active());
    }

    #[test]
    fn test_key_during_dwell_captures_chord() {
        let start = Instant::now();
        let mut session = armed();
        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, start);
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, start);
        let generation = started(&effects).unwrap();

        let effects = session.on_input(
            InputEvent::KeyDown(KEY_K),
            ModifierSet::of(&[CTRL, SHIFT]),
            start + Duration::from_millis(300),
        );
        assert_eq!(effects[0], Effect::CancelDwell);
        assert_eq!(
            captured(&effects),
            vec![Binding::key(KEY_K, ModifierSet::of(&[CTRL, SHIFT]))]
        );

        let effects = session.on_tick(generation, ModifierSet::NONE, start + DWELL_THRESHOLD);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_key_capture_merges_live_modifiers() {
        // Alt was already down when recording began, so no event reported it
        let mut session = armed();
        let effects = session.on_input(
            InputEvent::KeyDown(KEY_K),
            ModifierSet::from(ALT),
            Instant::now(),
        );
        assert_eq!(captured(&effects), vec![Binding::key(KEY_K, ModifierSet::from(ALT))]);
    }

    #[test]
    fn test_left_click_released_early_is_ignored() {
        let start = Instant::now();
        let mut session = armed();
        let effects = session.on_input(InputEvent::ButtonDown(KeyCode::MOUSE_LEFT), ModifierSet::NONE, start);
        let generation = started(&effects).unwrap();

        let effects = session.on_input(
            InputEvent::ButtonUp(KeyCode::MOUSE_LEFT),
            ModifierSet::NONE,
            start + Duration::from_millis(400),
        );
        assert!(captured(&effects).is_empty());
        assert!(effects.contains(&Effect::CancelDwell));
        assert!(session.on_tick(generation, ModifierSet::NONE, start + DWELL_THRESHOLD).is_empty());
        assert!(session.is_active());
    }

    #[test]
    fn test_left_click_held_captures_button_with_modifiers() {
        let start = Instant::now();
        let mut session = armed();
        let effects = session.on_input(InputEvent::ButtonDown(KeyCode::MOUSE_RIGHT), ModifierSet::NONE, start);
        let generation = started(&effects).unwrap();

        let effects = session.on_tick(generation, ModifierSet::from(CTRL), start + Duration::from_millis(1050));
        assert_eq!(
            captured(&effects),
            vec![Binding::key(KeyCode::MOUSE_RIGHT, ModifierSet::from(CTRL))]
        );
        assert_eq!(progress(&effects), vec![1.0, 0.0]);
    }

    #[test]
    fn test_click_cancels_modifier_dwell() {
        let start = Instant::now();
        let mut session = armed();
        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, start);
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, start);
        let modifier_generation = started(&effects).unwrap();

        let effects = session.on_input(InputEvent::ButtonDown(KeyCode::MOUSE_LEFT), ModifierSet::NONE, start);
        assert_eq!(effects[0], Effect::CancelDwell);
        let button_generation = started(&effects).unwrap();
        assert_ne!(modifier_generation, button_generation);

        assert!(session
            .on_tick(modifier_generation, ModifierSet::NONE, start + DWELL_THRESHOLD)
            .is_empty());
        let effects = session.on_tick(button_generation, ModifierSet::NONE, start + DWELL_THRESHOLD);
        assert_eq!(
            captured(&effects),
            vec![Binding::key(KeyCode::MOUSE_LEFT, ModifierSet::of(&[CTRL, SHIFT]))]
        );
    }

    #[test]
    fn test_side_button_captures_immediately() {
        let mut session = armed();
        let effects = session.on_input(InputEvent::ButtonDown(KeyCode::MOUSE_X2), ModifierSet::NONE, Instant::now());
        assert_eq!(
            effects,
            vec![Effect::Captured(Binding::key(KeyCode::MOUSE_X2, ModifierSet::NONE))]
        );
    }

    #[test]
    fn test_stop_discards_without_capture() {
        let start = Instant::now();
        let mut session = armed();
        session.on_input(InputEvent::KeyDown(KeyCode::LEFT_CONTROL), ModifierSet::NONE, start);
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_ALT), ModifierSet::NONE, start);
        let generation = started(&effects).unwrap();

        let effects = session.stop();
        assert_eq!(
            effects,
            vec![
                Effect::CancelDwell,
                Effect::Emit(HotkeyEvent::HoldProgress { fraction: 0.0 }),
            ]
        );
        assert!(session.on_tick(generation, ModifierSet::NONE, start + DWELL_THRESHOLD).is_empty());

        // Restarting begins from an empty set
        session.start();
        let effects = session.on_input(InputEvent::KeyDown(KeyCode::LEFT_SHIFT), ModifierSet::NONE, start);
        assert!(started(&effects).is_none());
    }
}
