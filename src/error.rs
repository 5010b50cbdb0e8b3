//! Custom error types for macro-key-runner.
//!
//! Errors local to one script (sink failures, stop timeouts) are reported
//! through this type but never tear down other scripts or the engine.

use std::io;
use thiserror::Error;

/// Main error type for macro-key-runner operations.
#[derive(Error, Debug)]
pub enum MkrError {
    /// A raw symbol could not be turned into a usable binding token.
    #[error("invalid binding '{raw}': {reason}")]
    InvalidBinding { raw: String, reason: String },

    /// Start was requested for a script that already has a runtime unit.
    #[error("script '{0}' is already running")]
    AlreadyRunning(String),

    /// The synthetic input primitive failed.
    #[error("output sink failed on '{key}': {reason}")]
    OutputSinkFailure { key: String, reason: String },

    /// An execution unit did not observe cancellation in time.
    #[error("script '{id}' did not stop within {waited_ms}ms")]
    StopTimeout { id: String, waited_ms: u64 },

    /// The id was never registered.
    #[error("unknown script '{0}'")]
    UnknownScript(String),

    /// Start was requested for a script whose enabled flag is off.
    #[error("script '{0}' is disabled")]
    ScriptDisabled(String),

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Platform-specific operation is not supported.
    #[error("operation not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// Error registering or handling hotkey.
    #[error("hotkey error: {0}")]
    Hotkey(String),

    /// The OS input hook could not be installed or died.
    #[error("input source error: {0}")]
    InputSource(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for macro-key-runner operations.
pub type Result<T> = std::result::Result<T, MkrError>;

impl MkrError {
    /// Create a new InvalidBinding error.
    pub fn invalid_binding(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBinding {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn already_running(id: impl Into<String>) -> Self {
        Self::AlreadyRunning(id.into())
    }

    /// Create a new OutputSinkFailure error.
    pub fn output_sink(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutputSinkFailure {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_timeout(id: impl Into<String>, waited_ms: u64) -> Self {
        Self::StopTimeout {
            id: id.into(),
            waited_ms,
        }
    }

    pub fn unknown_script(id: impl Into<String>) -> Self {
        Self::UnknownScript(id.into())
    }

    pub fn script_disabled(id: impl Into<String>) -> Self {
        Self::ScriptDisabled(id.into())
    }

    /// Create a new ConfigValidation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigSave error.
    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new UnsupportedPlatform error.
    pub fn unsupported_platform(message: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(message.into())
    }

    /// Create a new Hotkey error.
    pub fn hotkey(message: impl Into<String>) -> Self {
        Self::Hotkey(message.into())
    }

    pub fn input_source(message: impl Into<String>) -> Self {
        Self::InputSource(message.into())
    }

    /// Whether this error belongs to a single script's runtime rather than
    /// to the caller's use of the registry.
    pub fn is_script_local(&self) -> bool {
        matches!(
            self,
            Self::OutputSinkFailure { .. } | Self::StopTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MkrError::invalid_binding("ab", "expected a single key");
        assert_eq!(err.to_string(), "invalid binding 'ab': expected a single key");

        let err = MkrError::already_running("spam_macro");
        assert_eq!(err.to_string(), "script 'spam_macro' is already running");

        let err = MkrError::stop_timeout("wall_take", 300);
        assert_eq!(err.to_string(), "script 'wall_take' did not stop within 300ms");

        let err = MkrError::config_validation("script id cannot be empty");
        assert_eq!(
            err.to_string(),
            "configuration error: script id cannot be empty"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: MkrError = io_err.into();
        assert!(matches!(err, MkrError::Io(_)));
    }

    #[test]
    fn test_script_local_classification() {
        assert!(MkrError::output_sink("g", "denied").is_script_local());
        assert!(MkrError::stop_timeout("x", 10).is_script_local());
        assert!(!MkrError::unknown_script("x").is_script_local());
    }
}
