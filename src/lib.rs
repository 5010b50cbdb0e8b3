//! # Macro Key Runner
//!
//! Bind key and mouse triggers to timed input sequences and run several of
//! them at once.
//!
//! ## Features
//!
//! - Four trigger policies: press, hold-release, toggle-hold and hold-spam
//! - Independent execution units per script, cancellable at any point
//! - Global hotkey to suspend and resume every script
//! - JSON configuration and persisted settings
//! - Live keyboard/mouse hooks behind the `native` feature
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use macro_key_runner::{presets, Binding, Engine, InputEvent, InputHub, LogSink};
//!
//! # async fn demo() -> macro_key_runner::Result<()> {
//! let hub = InputHub::new();
//! let engine = Engine::new(Arc::new(LogSink), hub.clone());
//!
//! for script in presets::builtin(&presets::default_keybinds())? {
//!     engine.register(script)?;
//! }
//! engine.enable(presets::WALL_TAKE)?;
//! engine.start(presets::WALL_TAKE)?;
//!
//! hub.publish(InputEvent::press(Binding::parse("r")?));
//! engine.stop_all().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "keybinds": { "toggle_button": "t", "pickup_trigger": "Button.right" },
//!   "enabled": { "spam_macro": true, "auto_pickup": true },
//!   "stop_hotkey": "ctrl+alt+s",
//!   "stop_timeout": "300ms"
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod hotkey;
pub mod input;
pub mod key;
pub mod output;
pub mod presets;
pub mod sequence;
pub mod trigger;

pub use config::{Config, Settings};
pub use engine::{Engine, ScriptDefinition, ScriptSnapshot, ScriptStatus, StatusChange};
pub use error::{MkrError, Result};
pub use hotkey::{HotkeyManager, SuspendSwitch};
pub use input::{InputEvent, InputHub, InputKind};
pub use key::{normalize, Binding};
pub use output::{LogSink, OutputSink, RecordingSink};
pub use sequence::{OutputAction, Sequence, SequenceExecutor};
pub use trigger::{TriggerMachine, TriggerPolicy};
