//! Key normalization and the [`Binding`] token.
//!
//! Every comparison between an observed input and a configured trigger goes
//! through [`normalize`], so `"Escape"`, `"Key.esc"` and `"ESC"` all end up
//! as the same token.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MkrError, Result};

/// Canonical tokens for the left, right and middle mouse buttons.
pub const MOUSE_LEFT: &str = "mouse_left";
pub const MOUSE_RIGHT: &str = "mouse_right";
pub const MOUSE_MIDDLE: &str = "mouse_middle";

/// Named keys accepted as bindings besides single characters and `f1`..`f24`.
pub const NAMED_KEYS: &[&str] = &[
    "space",
    "enter",
    "tab",
    "esc",
    "backspace",
    "delete",
    "insert",
    "home",
    "end",
    "pageup",
    "pagedown",
    "up",
    "down",
    "left",
    "right",
    "shift",
    "ctrl",
    "alt",
    "meta",
    "capslock",
    MOUSE_LEFT,
    MOUSE_RIGHT,
    MOUSE_MIDDLE,
];

fn synonym(token: &str) -> Option<&'static str> {
    let canonical = match token {
        "escape" => "esc",
        "return" => "enter",
        "spacebar" => "space",
        "control" | "ctrl_l" | "ctrl_r" | "lctrl" | "rctrl" | "controlleft" | "controlright" => {
            "ctrl"
        }
        "shift_l" | "shift_r" | "lshift" | "rshift" | "shiftleft" | "shiftright" => "shift",
        "alt_l" | "alt_r" | "alt_gr" | "altgr" | "lalt" | "ralt" | "option" => "alt",
        "cmd" | "cmd_l" | "cmd_r" | "super" | "win" | "windows" | "metaleft" | "metaright" => {
            "meta"
        }
        "del" => "delete",
        "ins" => "insert",
        "back" => "backspace",
        "pgup" | "page_up" => "pageup",
        "pgdn" | "page_down" => "pagedown",
        "arrowup" | "up_arrow" | "uparrow" => "up",
        "arrowdown" | "down_arrow" | "downarrow" => "down",
        "arrowleft" | "left_arrow" | "leftarrow" => "left",
        "arrowright" | "right_arrow" | "rightarrow" => "right",
        "caps_lock" | "caps" => "capslock",
        "mouse-left" | "mouseleft" | "mouse1" | "lbutton" | "lmb" | "leftclick" => MOUSE_LEFT,
        "mouse-right" | "mouseright" | "mouse2" | "rbutton" | "rmb" | "rightclick" => MOUSE_RIGHT,
        "mouse-middle" | "mousemiddle" | "mouse3" | "mbutton" | "mmb" | "middleclick" => {
            MOUSE_MIDDLE
        }
        _ => return None,
    };
    Some(canonical)
}

/// Map a raw symbol to its canonical lowercase token.
///
/// Pure and infallible: unknown symbols pass through lowercased and trimmed.
/// A lone space character is the `space` key, not whitespace.
pub fn normalize(raw: &str) -> String {
    if raw == " " {
        return "space".to_string();
    }

    let lowered = raw.trim().to_lowercase();

    // Listener-style prefixes: "Key.esc", "Button.left".
    if let Some(rest) = lowered.strip_prefix("button.") {
        return match rest {
            "left" => MOUSE_LEFT.to_string(),
            "right" => MOUSE_RIGHT.to_string(),
            "middle" => MOUSE_MIDDLE.to_string(),
            other => format!("mouse_{other}"),
        };
    }
    let lowered = match lowered.strip_prefix("key.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lowered,
    };

    match synonym(&lowered) {
        Some(canonical) => canonical.to_string(),
        None => lowered,
    }
}

fn is_function_key(token: &str) -> bool {
    token
        .strip_prefix('f')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=24).contains(&n))
}

/// A normalized input token. Equality is by token, so it is case-insensitive
/// with respect to the raw symbol it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binding(String);

impl Binding {
    /// Normalize `raw` and check that it names exactly one key or button.
    pub fn parse(raw: &str) -> Result<Self> {
        let token = normalize(raw);

        if token.is_empty() {
            return Err(MkrError::invalid_binding(raw, "binding cannot be empty"));
        }
        if token.chars().count() == 1 {
            return Ok(Self(token));
        }
        if token.contains('+') {
            return Err(MkrError::invalid_binding(
                raw,
                "key combinations cannot be used as a single binding",
            ));
        }
        if NAMED_KEYS.contains(&token.as_str()) || is_function_key(&token) {
            return Ok(Self(token));
        }

        Err(MkrError::invalid_binding(
            raw,
            "expected a single character or a named key",
        ))
    }

    pub fn mouse_left() -> Self {
        Self(MOUSE_LEFT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_mouse(&self) -> bool {
        self.0.starts_with("mouse_")
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Binding {
    type Err = MkrError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Binding {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Binding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_synonyms() {
        assert_eq!(normalize("escape"), "esc");
        assert_eq!(normalize("Escape"), "esc");
        assert_eq!(normalize("Key.esc"), "esc");
        assert_eq!(normalize("Return"), "enter");
        assert_eq!(normalize("ctrl_l"), "ctrl");
        assert_eq!(normalize("ArrowUp"), "up");
        assert_eq!(normalize("Button.left"), MOUSE_LEFT);
        assert_eq!(normalize("mouse-left"), MOUSE_LEFT);
        assert_eq!(normalize(" "), "space");
    }

    #[test]
    fn test_normalize_passthrough() {
        assert_eq!(normalize("G"), "g");
        assert_eq!(normalize("  T "), "t");
        assert_eq!(normalize("something_odd"), "something_odd");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_is_stable() {
        for raw in ["Escape", "Key.space", "Button.right", "F5", "x"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_binding_parse_valid() {
        assert_eq!(Binding::parse("G").unwrap().as_str(), "g");
        assert_eq!(Binding::parse("2").unwrap().as_str(), "2");
        assert_eq!(Binding::parse("Space").unwrap().as_str(), "space");
        assert_eq!(Binding::parse("f12").unwrap().as_str(), "f12");
        assert!(Binding::parse("Button.left").unwrap().is_mouse());
        assert!(!Binding::parse("e").unwrap().is_mouse());
    }

    #[test]
    fn test_binding_parse_invalid() {
        assert!(matches!(
            Binding::parse(""),
            Err(MkrError::InvalidBinding { .. })
        ));
        assert!(Binding::parse("ab").is_err());
        assert!(Binding::parse("ctrl+s").is_err());
        assert!(Binding::parse("f25").is_err());
    }

    #[test]
    fn test_binding_equality_case_insensitive() {
        assert_eq!(Binding::parse("T").unwrap(), Binding::parse("t").unwrap());
        assert_eq!(
            Binding::parse("ESCAPE").unwrap(),
            Binding::parse("esc").unwrap()
        );
    }

    #[test]
    fn test_binding_serde() {
        let b: Binding = serde_json::from_str("\"Escape\"").unwrap();
        assert_eq!(b.as_str(), "esc");
        assert_eq!(serde_json::to_string(&b).unwrap(), "\"esc\"");
        assert!(serde_json::from_str::<Binding>("\"nope\"").is_err());
    }
}
