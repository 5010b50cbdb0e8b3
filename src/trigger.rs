//! Per-script trigger state machines.
//!
//! A [`TriggerMachine`] turns the stream of input events a script observes
//! into start/stop decisions. It holds no timers and does no I/O; the engine
//! feeds it events and reports back when a sequence unit has finished.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::input::InputEvent;
use crate::key::Binding;

/// When a script's sequence starts and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Run the sequence once per press of any binding.
    Press,
    /// Arm on press, run the sequence once on release of the same binding.
    HoldRelease,
    /// Repeat the sequence from press until release of the same binding.
    ToggleHold,
    /// Repeat the sequence while every binding is held.
    HoldSpam,
}

impl TriggerPolicy {
    /// Whether the sequence loops until a stop decision.
    pub fn repeats(self) -> bool {
        matches!(self, Self::ToggleHold | Self::HoldSpam)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
    Running,
}

/// Decision produced for one input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Ignore,
    /// Entered the armed state; nothing to run yet.
    Arm,
    /// Left the armed state without running anything.
    Disarm,
    /// Run the sequence once.
    Fire,
    /// Start the repeating sequence.
    Start,
    /// Cancel the repeating sequence.
    Stop,
}

#[derive(Debug, Clone)]
pub struct TriggerMachine {
    policy: TriggerPolicy,
    bindings: Vec<Binding>,
    state: TriggerState,
    armed_by: Option<Binding>,
    held: HashSet<Binding>,
}

impl TriggerMachine {
    pub fn new(policy: TriggerPolicy, bindings: Vec<Binding>) -> Self {
        Self {
            policy,
            bindings,
            state: TriggerState::Idle,
            armed_by: None,
            held: HashSet::new(),
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Binding that armed or started the current cycle, if any.
    pub fn armed_by(&self) -> Option<&Binding> {
        self.armed_by.as_ref()
    }

    /// Feed one event. Events for bindings outside this script never change state.
    pub fn on_event(&mut self, event: &InputEvent) -> TriggerAction {
        if !self.bindings.contains(&event.binding) {
            return TriggerAction::Ignore;
        }

        match self.policy {
            TriggerPolicy::Press => self.on_press_policy(event),
            TriggerPolicy::HoldRelease => self.on_hold_release(event),
            TriggerPolicy::ToggleHold => self.on_toggle_hold(event),
            TriggerPolicy::HoldSpam => self.on_hold_spam(event),
        }
    }

    /// The sequence unit ended on its own, either completed or failed.
    ///
    /// A repeating unit only ends on its own when it failed; the machine then
    /// waits for the trigger to be released before it can start again, so
    /// key-repeat presses do not restart a failing sequence.
    pub fn sequence_finished(&mut self) {
        if self.state != TriggerState::Running {
            return;
        }
        if self.policy.repeats() {
            self.state = TriggerState::Armed;
        } else {
            self.state = TriggerState::Idle;
            self.armed_by = None;
        }
    }

    fn on_press_policy(&mut self, event: &InputEvent) -> TriggerAction {
        if event.is_press() && self.state == TriggerState::Idle {
            self.state = TriggerState::Running;
            self.armed_by = Some(event.binding.clone());
            return TriggerAction::Fire;
        }
        TriggerAction::Ignore
    }

    fn on_hold_release(&mut self, event: &InputEvent) -> TriggerAction {
        match self.state {
            TriggerState::Idle if event.is_press() => {
                self.state = TriggerState::Armed;
                self.armed_by = Some(event.binding.clone());
                TriggerAction::Arm
            }
            TriggerState::Armed
                if event.is_release() && self.armed_by.as_ref() == Some(&event.binding) =>
            {
                self.state = TriggerState::Running;
                TriggerAction::Fire
            }
            _ => TriggerAction::Ignore,
        }
    }

    fn on_toggle_hold(&mut self, event: &InputEvent) -> TriggerAction {
        if event.is_press() {
            if self.state != TriggerState::Idle {
                // key-repeat
                return TriggerAction::Ignore;
            }
            self.state = TriggerState::Running;
            self.armed_by = Some(event.binding.clone());
            return TriggerAction::Start;
        }

        if self.armed_by.as_ref() != Some(&event.binding) {
            return TriggerAction::Ignore;
        }
        let was = self.state;
        self.state = TriggerState::Idle;
        self.armed_by = None;
        match was {
            TriggerState::Running => TriggerAction::Stop,
            TriggerState::Armed => TriggerAction::Disarm,
            TriggerState::Idle => TriggerAction::Ignore,
        }
    }

    fn on_hold_spam(&mut self, event: &InputEvent) -> TriggerAction {
        if event.is_press() {
            if !self.held.insert(event.binding.clone()) {
                return TriggerAction::Ignore;
            }
            let all_held = self.held.len() == self.bindings.len();
            return match self.state {
                TriggerState::Running => TriggerAction::Ignore,
                _ if all_held => {
                    self.state = TriggerState::Running;
                    self.armed_by = Some(event.binding.clone());
                    TriggerAction::Start
                }
                TriggerState::Idle => {
                    self.state = TriggerState::Armed;
                    self.armed_by = Some(event.binding.clone());
                    TriggerAction::Arm
                }
                TriggerState::Armed => TriggerAction::Ignore,
            };
        }

        if !self.held.remove(&event.binding) {
            return TriggerAction::Ignore;
        }
        let was = self.state;
        if self.held.is_empty() {
            self.state = TriggerState::Idle;
            self.armed_by = None;
        } else {
            self.state = TriggerState::Armed;
        }
        match (was, self.state) {
            (TriggerState::Running, _) => TriggerAction::Stop,
            (TriggerState::Armed, TriggerState::Idle) => TriggerAction::Disarm,
            _ => TriggerAction::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(raw: &str) -> Binding {
        Binding::parse(raw).unwrap()
    }

    fn press(raw: &str) -> InputEvent {
        InputEvent::press(b(raw))
    }

    fn release(raw: &str) -> InputEvent {
        InputEvent::release(b(raw))
    }

    #[test]
    fn test_foreign_bindings_never_transition() {
        let policies = [
            TriggerPolicy::Press,
            TriggerPolicy::HoldRelease,
            TriggerPolicy::ToggleHold,
            TriggerPolicy::HoldSpam,
        ];
        let others = ["a", "1", "space", "mouse_left", "f4", "esc"];
        for policy in policies {
            let mut m = TriggerMachine::new(policy, vec![b("t")]);
            for raw in others {
                assert_eq!(m.on_event(&press(raw)), TriggerAction::Ignore);
                assert_eq!(m.on_event(&release(raw)), TriggerAction::Ignore);
                assert_eq!(m.state(), TriggerState::Idle);
            }
        }
    }

    #[test]
    fn test_press_fires_once_until_finished() {
        let mut m = TriggerMachine::new(TriggerPolicy::Press, vec![b("r")]);
        assert_eq!(m.on_event(&press("r")), TriggerAction::Fire);
        assert_eq!(m.on_event(&press("r")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("r")), TriggerAction::Ignore);
        m.sequence_finished();
        assert_eq!(m.state(), TriggerState::Idle);
        assert_eq!(m.on_event(&press("R")), TriggerAction::Fire);
    }

    #[test]
    fn test_hold_release_fires_on_release() {
        let mut m = TriggerMachine::new(TriggerPolicy::HoldRelease, vec![b("g")]);
        assert_eq!(m.on_event(&press("g")), TriggerAction::Arm);
        assert_eq!(m.state(), TriggerState::Armed);
        assert_eq!(m.on_event(&release("g")), TriggerAction::Fire);
        assert_eq!(m.state(), TriggerState::Running);
        m.sequence_finished();
        assert_eq!(m.state(), TriggerState::Idle);
    }

    #[test]
    fn test_hold_release_ignores_interleaved_keys() {
        let mut m = TriggerMachine::new(TriggerPolicy::HoldRelease, vec![b("x")]);
        assert_eq!(m.on_event(&press("x")), TriggerAction::Arm);
        assert_eq!(m.on_event(&press("y")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("y")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("x")), TriggerAction::Fire);
    }

    #[test]
    fn test_hold_release_only_armed_binding_fires() {
        let mut m = TriggerMachine::new(TriggerPolicy::HoldRelease, vec![b("x"), b("z")]);
        assert_eq!(m.on_event(&press("x")), TriggerAction::Arm);
        assert_eq!(m.on_event(&press("z")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("z")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("x")), TriggerAction::Fire);
    }

    #[test]
    fn test_toggle_hold_ignores_repeated_press() {
        let mut m = TriggerMachine::new(TriggerPolicy::ToggleHold, vec![b("t")]);
        assert_eq!(m.on_event(&press("t")), TriggerAction::Start);
        assert_eq!(m.on_event(&press("t")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&press("t")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("t")), TriggerAction::Stop);
        assert_eq!(m.state(), TriggerState::Idle);
        assert_eq!(m.on_event(&release("t")), TriggerAction::Ignore);
    }

    #[test]
    fn test_toggle_hold_waits_for_release_after_failure() {
        let mut m = TriggerMachine::new(TriggerPolicy::ToggleHold, vec![b("t")]);
        assert_eq!(m.on_event(&press("t")), TriggerAction::Start);
        m.sequence_finished();
        assert_eq!(m.state(), TriggerState::Armed);
        assert_eq!(m.on_event(&press("t")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("t")), TriggerAction::Disarm);
        assert_eq!(m.on_event(&press("t")), TriggerAction::Start);
    }

    #[test]
    fn test_hold_spam_single_binding() {
        let mut m = TriggerMachine::new(TriggerPolicy::HoldSpam, vec![b("mouse_left")]);
        assert_eq!(m.on_event(&press("Button.left")), TriggerAction::Start);
        assert_eq!(m.on_event(&press("mouse_left")), TriggerAction::Ignore);
        assert_eq!(m.on_event(&release("mouse_left")), TriggerAction::Stop);
        assert_eq!(m.state(), TriggerState::Idle);
    }

    #[test]
    fn test_hold_spam_chord_stops_on_modifier_release() {
        let mut m = TriggerMachine::new(TriggerPolicy::HoldSpam, vec![b("r"), b("mouse_left")]);
        assert_eq!(m.on_event(&press("r")), TriggerAction::Arm);
        assert_eq!(m.on_event(&press("mouse_left")), TriggerAction::Start);
        assert_eq!(m.on_event(&release("r")), TriggerAction::Stop);
        assert_eq!(m.state(), TriggerState::Armed);
        assert_eq!(m.on_event(&press("r")), TriggerAction::Start);
        assert_eq!(m.on_event(&release("mouse_left")), TriggerAction::Stop);
        assert_eq!(m.on_event(&release("r")), TriggerAction::Disarm);
        assert_eq!(m.state(), TriggerState::Idle);
    }

    #[test]
    fn test_hold_spam_release_without_press_is_ignored() {
        let mut m = TriggerMachine::new(TriggerPolicy::HoldSpam, vec![b("f")]);
        assert_eq!(m.on_event(&release("f")), TriggerAction::Ignore);
        assert_eq!(m.state(), TriggerState::Idle);
    }

    #[test]
    fn test_policy_serde() {
        let p: TriggerPolicy = serde_json::from_str("\"hold_release\"").unwrap();
        assert_eq!(p, TriggerPolicy::HoldRelease);
        assert!(TriggerPolicy::HoldSpam.repeats());
        assert!(!TriggerPolicy::Press.repeats());
    }
}
