//! Input events and their fan-out to running scripts.
//!
//! One OS-level listener feeds an [`InputHub`]; every started script holds
//! its own subscription and sees the events in delivery order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::Result;
use crate::key::Binding;

/// Direction and device of a raw input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    KeyDown,
    KeyUp,
    ButtonDown,
    ButtonUp,
}

/// A normalized input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub binding: Binding,
}

impl InputEvent {
    /// Press of `binding`; mouse tokens become button events.
    pub fn press(binding: Binding) -> Self {
        let kind = if binding.is_mouse() {
            InputKind::ButtonDown
        } else {
            InputKind::KeyDown
        };
        Self { kind, binding }
    }

    pub fn release(binding: Binding) -> Self {
        let kind = if binding.is_mouse() {
            InputKind::ButtonUp
        } else {
            InputKind::KeyUp
        };
        Self { kind, binding }
    }

    pub fn is_press(&self) -> bool {
        matches!(self.kind, InputKind::KeyDown | InputKind::ButtonDown)
    }

    pub fn is_release(&self) -> bool {
        !self.is_press()
    }

    /// Events for one scripted token: `+t` presses, `-t` releases and a bare
    /// `t` is a press followed by a release.
    pub fn parse_scripted(token: &str) -> Result<Vec<Self>> {
        if let Some(raw) = token.strip_prefix('+') {
            Ok(vec![Self::press(Binding::parse(raw)?)])
        } else if let Some(raw) = token.strip_prefix('-') {
            Ok(vec![Self::release(Binding::parse(raw)?)])
        } else {
            let binding = Binding::parse(token)?;
            Ok(vec![Self::press(binding.clone()), Self::release(binding)])
        }
    }
}

/// Fan-out point between the input listener and script subscriptions.
#[derive(Debug, Clone, Default)]
pub struct InputHub {
    subscribers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<InputEvent>>>>,
    capture_seq: Arc<AtomicU64>,
}

impl InputHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `id`, replacing any previous subscription under that id.
    pub fn subscribe(&self, id: &str) -> mpsc::UnboundedReceiver<InputEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.subscribers.lock().insert(id.to_string(), tx).is_some() {
            debug!(script = id, "replaced existing input subscription");
        }
        rx
    }

    /// Returns true if a subscription was removed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.lock().remove(id).is_some()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.subscribers.lock().contains_key(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `event` to every subscriber. Closed receivers are dropped.
    pub fn publish(&self, event: InputEvent) {
        trace!(?event, "input event");
        self.subscribers
            .lock()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Wait for the next press on any key or button.
    ///
    /// Used by key-capture sessions; returns `None` on timeout.
    pub async fn capture_next(&self, timeout: Duration) -> Option<Binding> {
        let id = format!(
            "__capture_{}",
            self.capture_seq.fetch_add(1, Ordering::Relaxed)
        );
        let mut rx = self.subscribe(&id);
        let captured = tokio::time::timeout(timeout, async {
            while let Some(event) = rx.recv().await {
                if event.is_press() {
                    return Some(event.binding);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();
        self.unsubscribe(&id);
        captured
    }
}

/// OS listener built on `rdev`.
#[cfg(feature = "native")]
pub mod native {
    use super::*;
    use crate::error::{MkrError, Result};
    use crate::key::{self, MOUSE_LEFT, MOUSE_MIDDLE, MOUSE_RIGHT};
    use rdev::{Button, EventType, Key};
    use tracing::error;

    /// Raw symbol for an rdev key, before normalization.
    pub fn key_symbol(key: &Key) -> String {
        let named = match key {
            Key::Space => "space",
            Key::Return | Key::KpReturn => "enter",
            Key::Tab => "tab",
            Key::Escape => "esc",
            Key::Backspace => "backspace",
            Key::Delete => "delete",
            Key::Insert => "insert",
            Key::Home => "home",
            Key::End => "end",
            Key::PageUp => "pageup",
            Key::PageDown => "pagedown",
            Key::UpArrow => "up",
            Key::DownArrow => "down",
            Key::LeftArrow => "left",
            Key::RightArrow => "right",
            Key::ShiftLeft | Key::ShiftRight => "shift",
            Key::ControlLeft | Key::ControlRight => "ctrl",
            Key::Alt | Key::AltGr => "alt",
            Key::MetaLeft | Key::MetaRight => "meta",
            Key::CapsLock => "capslock",
            Key::F1 => "f1",
            Key::F2 => "f2",
            Key::F3 => "f3",
            Key::F4 => "f4",
            Key::F5 => "f5",
            Key::F6 => "f6",
            Key::F7 => "f7",
            Key::F8 => "f8",
            Key::F9 => "f9",
            Key::F10 => "f10",
            Key::F11 => "f11",
            Key::F12 => "f12",
            Key::Num0 | Key::Kp0 => "0",
            Key::Num1 | Key::Kp1 => "1",
            Key::Num2 | Key::Kp2 => "2",
            Key::Num3 | Key::Kp3 => "3",
            Key::Num4 | Key::Kp4 => "4",
            Key::Num5 | Key::Kp5 => "5",
            Key::Num6 | Key::Kp6 => "6",
            Key::Num7 | Key::Kp7 => "7",
            Key::Num8 | Key::Kp8 => "8",
            Key::Num9 | Key::Kp9 => "9",
            other => {
                // KeyA..KeyZ
                let debug = format!("{other:?}");
                return match debug.strip_prefix("Key") {
                    Some(letter) if letter.len() == 1 => letter.to_lowercase(),
                    _ => debug.to_lowercase(),
                };
            }
        };
        named.to_string()
    }

    pub fn button_symbol(button: &Button) -> String {
        match button {
            Button::Left => MOUSE_LEFT.to_string(),
            Button::Right => MOUSE_RIGHT.to_string(),
            Button::Middle => MOUSE_MIDDLE.to_string(),
            Button::Unknown(n) => format!("mouse_{n}"),
        }
    }

    fn translate(event_type: &EventType) -> Option<InputEvent> {
        let (kind, raw) = match event_type {
            EventType::KeyPress(k) => (InputKind::KeyDown, key_symbol(k)),
            EventType::KeyRelease(k) => (InputKind::KeyUp, key_symbol(k)),
            EventType::ButtonPress(b) => (InputKind::ButtonDown, button_symbol(b)),
            EventType::ButtonRelease(b) => (InputKind::ButtonUp, button_symbol(b)),
            _ => return None,
        };
        let binding = Binding::parse(&key::normalize(&raw)).ok()?;
        Some(InputEvent { kind, binding })
    }

    /// Run `rdev::listen` on a dedicated thread, publishing into `hub`.
    pub fn spawn_listener(hub: InputHub) -> Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("mkr-input".to_string())
            .spawn(move || {
                if let Err(e) = rdev::listen(move |event: rdev::Event| {
                    if let Some(input) = translate(&event.event_type) {
                        hub.publish(input);
                    }
                }) {
                    error!("input listener stopped: {:?}", e);
                }
            })
            .map_err(|e| MkrError::input_source(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(raw: &str) -> Binding {
        Binding::parse(raw).unwrap()
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(InputEvent::press(b("g")).kind, InputKind::KeyDown);
        assert_eq!(InputEvent::release(b("g")).kind, InputKind::KeyUp);
        assert_eq!(
            InputEvent::press(b("mouse_left")).kind,
            InputKind::ButtonDown
        );
        assert!(InputEvent::release(b("mouse_left")).is_release());
    }

    #[test]
    fn test_parse_scripted() {
        let press = InputEvent::parse_scripted("+T").unwrap();
        assert_eq!(press, vec![InputEvent::press(b("t"))]);

        let release = InputEvent::parse_scripted("-Button.left").unwrap();
        assert_eq!(release[0].kind, InputKind::ButtonUp);

        let tap = InputEvent::parse_scripted("r").unwrap();
        assert_eq!(tap.len(), 2);
        assert!(tap[0].is_press() && tap[1].is_release());

        assert!(InputEvent::parse_scripted("+").is_err());
        assert!(InputEvent::parse_scripted("ctrl+s").is_err());
    }

    #[tokio::test]
    async fn test_publish_fans_out_in_order() {
        let hub = InputHub::new();
        let mut a = hub.subscribe("a");
        let mut c = hub.subscribe("c");

        hub.publish(InputEvent::press(b("t")));
        hub.publish(InputEvent::release(b("t")));

        for rx in [&mut a, &mut c] {
            assert!(rx.recv().await.unwrap().is_press());
            assert!(rx.recv().await.unwrap().is_release());
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let hub = InputHub::new();
        let mut rx = hub.subscribe("a");
        assert!(hub.is_subscribed("a"));
        assert!(hub.unsubscribe("a"));
        assert!(!hub.unsubscribe("a"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let hub = InputHub::new();
        drop(hub.subscribe("gone"));
        let _kept = hub.subscribe("kept");
        hub.publish(InputEvent::press(b("x")));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_capture_next_skips_releases() {
        let hub = InputHub::new();
        let capture = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.capture_next(Duration::from_secs(2)).await })
        };
        while hub.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        hub.publish(InputEvent::release(b("q")));
        hub.publish(InputEvent::press(b("Escape")));

        assert_eq!(capture.await.unwrap(), Some(b("esc")));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_capture_next_timeout() {
        let hub = InputHub::new();
        assert_eq!(hub.capture_next(Duration::from_millis(20)).await, None);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
