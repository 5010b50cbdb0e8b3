//! Global suspend/resume hotkey.
//!
//! Each press of the registered combo flips a suspended flag and publishes
//! it on a `watch` channel; the CLI stops every script on suspend and starts
//! the enabled ones again on resume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MkrError, Result};
use crate::key;

/// Shared suspended flag plus its change feed.
#[derive(Debug, Clone)]
pub struct SuspendSwitch {
    suspended: Arc<AtomicBool>,
    sender: Arc<watch::Sender<bool>>,
}

impl Default for SuspendSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl SuspendSwitch {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            suspended: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(sender),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        let new_state = !self.suspended.fetch_xor(true, Ordering::AcqRel);
        self.sender.send_replace(new_state);
        if new_state {
            info!("automation suspended (press hotkey again to resume)");
        } else {
            info!("automation resumed");
        }
        new_state
    }
}

pub struct HotkeyManager {
    manager: GlobalHotKeyManager,
    hotkey: Option<HotKey>,
    switch: SuspendSwitch,
    listening: Arc<AtomicBool>,
}

impl HotkeyManager {
    pub fn new() -> Result<Self> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| MkrError::hotkey(format!("failed to create hotkey manager: {e}")))?;

        Ok(Self {
            manager,
            hotkey: None,
            switch: SuspendSwitch::new(),
            listening: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn register_stop_hotkey(&mut self, hotkey_str: &str) -> Result<()> {
        let hotkey = parse_hotkey(hotkey_str)?;

        self.manager
            .register(hotkey)
            .map_err(|e| MkrError::hotkey(format!("failed to register '{hotkey_str}': {e}")))?;

        if let Some(previous) = self.hotkey.replace(hotkey) {
            let _ = self.manager.unregister(previous);
        }
        info!(hotkey = hotkey_str, "stop hotkey registered");
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.switch.subscribe()
    }

    /// Watch hotkey events on a dedicated thread until [`stop_listener`](Self::stop_listener).
    pub fn start_listener(&self) -> Result<std::thread::JoinHandle<()>> {
        let Some(hotkey) = self.hotkey else {
            return Err(MkrError::hotkey("no hotkey registered"));
        };
        let target = hotkey.id();
        let switch = self.switch.clone();
        let listening = self.listening.clone();
        listening.store(true, Ordering::Release);

        std::thread::Builder::new()
            .name("mkr-hotkey".to_string())
            .spawn(move || {
                let receiver = GlobalHotKeyEvent::receiver();
                while listening.load(Ordering::Acquire) {
                    match receiver.recv_timeout(Duration::from_millis(100)) {
                        Ok(event) if event.id == target && event.state == HotKeyState::Pressed => {
                            switch.toggle();
                        }
                        Ok(event) => debug!(id = event.id, "ignored hotkey event"),
                        Err(_) => {}
                    }
                }
            })
            .map_err(|e| MkrError::hotkey(e.to_string()))
    }

    pub fn stop_listener(&self) {
        self.listening.store(false, Ordering::Release);
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        self.stop_listener();
        if let Some(hotkey) = self.hotkey.take() {
            if let Err(e) = self.manager.unregister(hotkey) {
                warn!("failed to unregister hotkey: {}", e);
            }
        }
    }
}

/// Parse a combo like `"ctrl+alt+s"`.
pub fn parse_hotkey(hotkey_str: &str) -> Result<HotKey> {
    let binding = hotkey_str.to_lowercase();
    let parts: Vec<&str> = binding
        .split('+')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        return Err(MkrError::hotkey("empty hotkey string"));
    }

    let mut modifiers = Modifiers::empty();
    let mut key_code = None;

    for part in &parts {
        match key::normalize(part).as_str() {
            "ctrl" => modifiers |= Modifiers::CONTROL,
            "alt" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "meta" => modifiers |= Modifiers::SUPER,
            token => {
                if key_code.is_some() {
                    return Err(MkrError::hotkey(format!(
                        "multiple keys specified in hotkey: {hotkey_str}"
                    )));
                }
                key_code = Some(parse_key_code(token)?);
            }
        }
    }

    let code = key_code
        .ok_or_else(|| MkrError::hotkey(format!("no key specified in hotkey: {hotkey_str}")))?;

    Ok(HotKey::new(Some(modifiers), code))
}

fn parse_key_code(token: &str) -> Result<Code> {
    let code = match token {
        "a" => Code::KeyA,
        "b" => Code::KeyB,
        "c" => Code::KeyC,
        "d" => Code::KeyD,
        "e" => Code::KeyE,
        "f" => Code::KeyF,
        "g" => Code::KeyG,
        "h" => Code::KeyH,
        "i" => Code::KeyI,
        "j" => Code::KeyJ,
        "k" => Code::KeyK,
        "l" => Code::KeyL,
        "m" => Code::KeyM,
        "n" => Code::KeyN,
        "o" => Code::KeyO,
        "p" => Code::KeyP,
        "q" => Code::KeyQ,
        "r" => Code::KeyR,
        "s" => Code::KeyS,
        "t" => Code::KeyT,
        "u" => Code::KeyU,
        "v" => Code::KeyV,
        "w" => Code::KeyW,
        "x" => Code::KeyX,
        "y" => Code::KeyY,
        "z" => Code::KeyZ,

        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,

        "f1" => Code::F1,
        "f2" => Code::F2,
        "f3" => Code::F3,
        "f4" => Code::F4,
        "f5" => Code::F5,
        "f6" => Code::F6,
        "f7" => Code::F7,
        "f8" => Code::F8,
        "f9" => Code::F9,
        "f10" => Code::F10,
        "f11" => Code::F11,
        "f12" => Code::F12,

        "space" => Code::Space,
        "enter" => Code::Enter,
        "tab" => Code::Tab,
        "esc" => Code::Escape,
        "backspace" => Code::Backspace,
        "delete" => Code::Delete,
        "insert" => Code::Insert,
        "home" => Code::Home,
        "end" => Code::End,
        "pageup" => Code::PageUp,
        "pagedown" => Code::PageDown,

        "up" => Code::ArrowUp,
        "down" => Code::ArrowDown,
        "left" => Code::ArrowLeft,
        "right" => Code::ArrowRight,

        _ => return Err(MkrError::hotkey(format!("unsupported key: {token}"))),
    };

    Ok(code)
}
