//! Synthetic input output.
//!
//! An [`OutputSink`] is shared by every running script. Implementations must
//! make each single press or release atomic; whole sequences from different
//! scripts are free to interleave.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use crate::error::{MkrError, Result};
use crate::key::Binding;

/// Platform synthetic-input primitive.
pub trait OutputSink: Send + Sync {
    fn press(&self, binding: &Binding) -> Result<()>;

    fn release(&self, binding: &Binding) -> Result<()>;
}

/// Which primitive a [`SinkCall`] recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOp {
    Press,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCall {
    pub op: SinkOp,
    pub binding: Binding,
    pub at: Instant,
}

/// Sink that records calls instead of injecting them.
///
/// Can be told to fail on one binding to exercise error paths.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail_on: Option<Binding>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every primitive addressed at `binding` fails with `OutputSinkFailure`.
    pub fn failing_on(binding: Binding) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(binding),
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Calls recorded strictly after `instant`.
    pub fn calls_after(&self, instant: Instant) -> usize {
        self.calls.lock().iter().filter(|c| c.at > instant).count()
    }

    fn record(&self, op: SinkOp, binding: &Binding) -> Result<()> {
        if self.fail_on.as_ref() == Some(binding) {
            return Err(MkrError::output_sink(
                binding.as_str(),
                "synthetic input denied",
            ));
        }
        self.calls.lock().push(SinkCall {
            op,
            binding: binding.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

impl OutputSink for RecordingSink {
    fn press(&self, binding: &Binding) -> Result<()> {
        self.record(SinkOp::Press, binding)
    }

    fn release(&self, binding: &Binding) -> Result<()> {
        self.record(SinkOp::Release, binding)
    }
}

/// Dry-run sink: logs each primitive and injects nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn press(&self, binding: &Binding) -> Result<()> {
        info!(key = %binding, "press");
        Ok(())
    }

    fn release(&self, binding: &Binding) -> Result<()> {
        info!(key = %binding, "release");
        Ok(())
    }
}

/// `rdev::simulate` backed sink.
#[cfg(feature = "native")]
pub mod native {
    use super::*;
    use crate::key::{MOUSE_LEFT, MOUSE_MIDDLE, MOUSE_RIGHT};
    use rdev::{Button, EventType, Key};

    /// Serializes `rdev::simulate` so one press or release is never split.
    #[derive(Debug, Default)]
    pub struct RdevSink {
        lock: Mutex<()>,
    }

    impl RdevSink {
        pub fn new() -> Self {
            Self::default()
        }

        fn simulate(&self, binding: &Binding, pressed: bool) -> Result<()> {
            let event = match to_rdev_button(binding) {
                Some(button) if pressed => EventType::ButtonPress(button),
                Some(button) => EventType::ButtonRelease(button),
                None => {
                    let key = to_rdev_key(binding)?;
                    if pressed {
                        EventType::KeyPress(key)
                    } else {
                        EventType::KeyRelease(key)
                    }
                }
            };

            let _guard = self.lock.lock();
            rdev::simulate(&event)
                .map_err(|_| MkrError::output_sink(binding.as_str(), "platform rejected event"))
        }
    }

    impl OutputSink for RdevSink {
        fn press(&self, binding: &Binding) -> Result<()> {
            self.simulate(binding, true)
        }

        fn release(&self, binding: &Binding) -> Result<()> {
            self.simulate(binding, false)
        }
    }

    fn to_rdev_button(binding: &Binding) -> Option<Button> {
        match binding.as_str() {
            MOUSE_LEFT => Some(Button::Left),
            MOUSE_RIGHT => Some(Button::Right),
            MOUSE_MIDDLE => Some(Button::Middle),
            _ => None,
        }
    }

    fn to_rdev_key(binding: &Binding) -> Result<Key> {
        let key = match binding.as_str() {
            "a" => Key::KeyA,
            "b" => Key::KeyB,
            "c" => Key::KeyC,
            "d" => Key::KeyD,
            "e" => Key::KeyE,
            "f" => Key::KeyF,
            "g" => Key::KeyG,
            "h" => Key::KeyH,
            "i" => Key::KeyI,
            "j" => Key::KeyJ,
            "k" => Key::KeyK,
            "l" => Key::KeyL,
            "m" => Key::KeyM,
            "n" => Key::KeyN,
            "o" => Key::KeyO,
            "p" => Key::KeyP,
            "q" => Key::KeyQ,
            "r" => Key::KeyR,
            "s" => Key::KeyS,
            "t" => Key::KeyT,
            "u" => Key::KeyU,
            "v" => Key::KeyV,
            "w" => Key::KeyW,
            "x" => Key::KeyX,
            "y" => Key::KeyY,
            "z" => Key::KeyZ,

            "0" => Key::Num0,
            "1" => Key::Num1,
            "2" => Key::Num2,
            "3" => Key::Num3,
            "4" => Key::Num4,
            "5" => Key::Num5,
            "6" => Key::Num6,
            "7" => Key::Num7,
            "8" => Key::Num8,
            "9" => Key::Num9,

            "f1" => Key::F1,
            "f2" => Key::F2,
            "f3" => Key::F3,
            "f4" => Key::F4,
            "f5" => Key::F5,
            "f6" => Key::F6,
            "f7" => Key::F7,
            "f8" => Key::F8,
            "f9" => Key::F9,
            "f10" => Key::F10,
            "f11" => Key::F11,
            "f12" => Key::F12,

            "space" => Key::Space,
            "enter" => Key::Return,
            "tab" => Key::Tab,
            "esc" => Key::Escape,
            "backspace" => Key::Backspace,
            "delete" => Key::Delete,
            "insert" => Key::Insert,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" => Key::PageUp,
            "pagedown" => Key::PageDown,
            "up" => Key::UpArrow,
            "down" => Key::DownArrow,
            "left" => Key::LeftArrow,
            "right" => Key::RightArrow,
            "shift" => Key::ShiftLeft,
            "ctrl" => Key::ControlLeft,
            "alt" => Key::Alt,
            "meta" => Key::MetaLeft,
            "capslock" => Key::CapsLock,

            other => {
                return Err(MkrError::output_sink(
                    other,
                    "no synthetic key for this binding",
                ))
            }
        };
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn b(raw: &str) -> Binding {
        Binding::parse(raw).unwrap()
    }

    #[test]
    fn test_recording_sink_records_in_order() {
        let sink = RecordingSink::new();
        sink.press(&b("g")).unwrap();
        sink.release(&b("g")).unwrap();

        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, SinkOp::Press);
        assert_eq!(calls[1].op, SinkOp::Release);
        assert!(calls[0].at <= calls[1].at);
    }

    #[test]
    fn test_failing_sink() {
        let sink = RecordingSink::failing_on(b("v"));
        assert!(sink.press(&b("g")).is_ok());
        assert!(matches!(
            sink.press(&b("v")),
            Err(MkrError::OutputSinkFailure { .. })
        ));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_concurrent_primitives_are_not_lost() {
        let sink = Arc::new(RecordingSink::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let key = b(&i.to_string());
                    for _ in 0..50 {
                        sink.press(&key).unwrap();
                        sink.release(&key).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.len(), 400);
    }
}
