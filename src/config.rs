//! Configuration files and persisted settings.
//!
//! Durations are written the way people type them (`"10ms"`, `"1s"`, `"2m"`)
//! and bare numbers are milliseconds.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::engine::ScriptDefinition;
use crate::error::{MkrError, Result};
use crate::hotkey;
use crate::key::Binding;
use crate::presets;

/// Settings file name used when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "keybind_manager_settings.json";

/// Version written into saved settings.
pub const SETTINGS_VERSION: &str = "2.0.0";

/// Parse `"500ms"`, `"2s"`, `"1m"` or a bare millisecond count.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let s = value.trim().to_lowercase();
    if s.is_empty() {
        return Err(MkrError::invalid_duration(value, "empty duration"));
    }

    let (number, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else {
        (s.as_str(), 1)
    };

    let amount: u64 = number.trim().parse().map_err(|_| {
        MkrError::invalid_duration(value, "expected a non-negative integer with ms, s or m")
    })?;

    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| MkrError::invalid_duration(value, "duration too large"))
}

/// Inverse of [`parse_duration`] for whole milliseconds.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms > 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms > 0 && ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}

/// `#[serde(with = "duration_format")]` for human-readable durations.
pub mod duration_format {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Millis(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        }
    }
}

/// Built-in keybinds with any user overrides layered on top.
fn merge_keybinds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error> {
    let overrides = BTreeMap::<String, String>::deserialize(deserializer)?;
    let mut keybinds = presets::default_keybinds();
    keybinds.extend(overrides);
    Ok(keybinds)
}

fn default_stop_hotkey() -> String {
    "ctrl+alt+s".to_string()
}

fn default_stop_timeout() -> Duration {
    Duration::from_millis(300)
}

/// Configuration consumed by `mkr run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Flat binding map used by the built-in scripts.
    #[serde(
        default = "presets::default_keybinds",
        deserialize_with = "merge_keybinds"
    )]
    pub keybinds: BTreeMap<String, String>,

    /// Enabled flag per script id.
    #[serde(default)]
    pub enabled: BTreeMap<String, bool>,

    /// User-defined scripts, in addition to the built-in ones.
    #[serde(default)]
    pub scripts: Vec<ScriptDefinition>,

    /// Global combo that suspends and resumes every script. Empty disables it.
    #[serde(default = "default_stop_hotkey")]
    pub stop_hotkey: String,

    /// Upper bound on how long `stop` waits for a script to wind down.
    #[serde(default = "default_stop_timeout", with = "duration_format")]
    pub stop_timeout: Duration,

    #[serde(default)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keybinds: presets::default_keybinds(),
            enabled: BTreeMap::new(),
            scripts: Vec::new(),
            stop_hotkey: default_stop_hotkey(),
            stop_timeout: default_stop_timeout(),
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| MkrError::config_load(path, e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| MkrError::config_load(path, e.to_string()))?;
        debug!(path, scripts = config.scripts.len(), "loaded config");
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| MkrError::config_save(path, e.to_string()))
    }

    /// Check everything that can be checked without touching the OS.
    pub fn validate(&self) -> Result<()> {
        if self.stop_timeout.is_zero() {
            return Err(MkrError::config_validation(
                "stop_timeout must be greater than zero",
            ));
        }

        for (name, raw) in &self.keybinds {
            Binding::parse(raw).map_err(|e| match e {
                MkrError::InvalidBinding { raw, reason } => {
                    MkrError::invalid_binding(raw, format!("keybind '{name}': {reason}"))
                }
                other => other,
            })?;
        }

        if !self.stop_hotkey.trim().is_empty() {
            hotkey::parse_hotkey(&self.stop_hotkey)
                .map_err(|e| MkrError::config_validation(format!("stop_hotkey: {e}")))?;
        }

        let definitions = self.script_definitions()?;
        for id in self.enabled.keys() {
            if !definitions.iter().any(|d| &d.id == id) {
                warn!(script = %id, "enabled flag for unknown script ignored");
            }
        }

        Ok(())
    }

    /// Built-in scripts followed by the user-defined ones, all validated.
    pub fn script_definitions(&self) -> Result<Vec<ScriptDefinition>> {
        let mut definitions = presets::builtin(&self.keybinds)?;

        for script in &self.scripts {
            script.validate()?;
            if definitions.iter().any(|d| d.id == script.id) {
                return Err(MkrError::config_validation(format!(
                    "duplicate script id '{}'",
                    script.id
                )));
            }
            definitions.push(script.clone());
        }

        Ok(definitions)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.get(id).copied().unwrap_or(false)
    }

    /// Overlay persisted keybinds and enabled flags onto this config.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.keybinds
            .extend(settings.keybinds.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.enabled
            .extend(settings.script_states.iter().map(|(k, v)| (k.clone(), *v)));
    }
}

/// Persisted keybinds and enabled flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "presets::default_keybinds", deserialize_with = "merge_keybinds")]
    pub keybinds: BTreeMap<String, String>,
    #[serde(default)]
    pub script_states: BTreeMap<String, bool>,
    #[serde(default = "settings_version")]
    pub version: String,
}

fn settings_version() -> String {
    SETTINGS_VERSION.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keybinds: presets::default_keybinds(),
            script_states: BTreeMap::new(),
            version: settings_version(),
        }
    }
}

impl Settings {
    /// Load from `path`, or defaults if the file does not exist.
    ///
    /// Only the scripts named in the file carry a flag; the rest keep
    /// whatever the configuration says.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }

        let shown = path.display().to_string();
        let content =
            fs::read_to_string(path).map_err(|e| MkrError::config_load(&shown, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| MkrError::config_load(shown, e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(|e| MkrError::config_save(path.display().to_string(), e.to_string()))
    }

}
