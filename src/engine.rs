//! Script registry and execution units.
//!
//! The [`Engine`] owns every registered script. Starting a script subscribes
//! it to the [`InputHub`] and spawns one task that drives its
//! [`TriggerMachine`]; that task in turn spawns at most one sequence unit at
//! a time. The registry lock only guards registry mutation, never a running
//! sequence.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MkrError, Result};
use crate::input::{InputEvent, InputHub};
use crate::key::Binding;
use crate::output::OutputSink;
use crate::sequence::{RunMode, RunOutcome, Sequence, SequenceExecutor};
use crate::trigger::{TriggerAction, TriggerMachine, TriggerPolicy, TriggerState};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(300);

const STATUS_BUFFER: usize = 64;

/// A named automation unit: trigger policy, bindings and output sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub policy: TriggerPolicy,
    pub bindings: Vec<Binding>,
    pub sequence: Sequence,
    /// Status text shown while armed, instead of `Armed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armed_label: Option<String>,
    /// Status text shown while running, instead of `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_label: Option<String>,
}

impl ScriptDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        policy: TriggerPolicy,
        bindings: Vec<Binding>,
        sequence: Sequence,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            policy,
            bindings,
            sequence,
            armed_label: None,
            running_label: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_labels(mut self, armed: Option<String>, running: Option<String>) -> Self {
        self.armed_label = armed;
        self.running_label = running;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MkrError::config_validation("script id cannot be empty"));
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(MkrError::config_validation(format!(
                "script id '{}' cannot contain whitespace",
                self.id
            )));
        }
        if self.bindings.is_empty() {
            return Err(MkrError::config_validation(format!(
                "script '{}' needs at least one binding",
                self.id
            )));
        }
        for (i, binding) in self.bindings.iter().enumerate() {
            if self.bindings[..i].contains(binding) {
                return Err(MkrError::config_validation(format!(
                    "script '{}' lists binding '{}' twice",
                    self.id, binding
                )));
            }
        }
        if self.sequence.is_empty() {
            return Err(MkrError::config_validation(format!(
                "script '{}' has an empty sequence",
                self.id
            )));
        }
        Ok(())
    }

    /// Display text for `status`, using this script's labels.
    pub fn describe(&self, status: &ScriptStatus) -> String {
        match status {
            ScriptStatus::Armed => self
                .armed_label
                .clone()
                .unwrap_or_else(|| status.to_string()),
            ScriptStatus::Running => self
                .running_label
                .clone()
                .unwrap_or_else(|| status.to_string()),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStatus {
    /// Registered, never started or disabled.
    Inactive,
    /// Started and waiting for its trigger.
    Ready,
    Armed,
    Running,
    Stopped,
    Error(String),
}

impl ScriptStatus {
    fn from_trigger(state: TriggerState) -> Self {
        match state {
            TriggerState::Idle => Self::Ready,
            TriggerState::Armed => Self::Armed,
            TriggerState::Running => Self::Running,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => f.write_str("Inactive"),
            Self::Ready => f.write_str("Ready"),
            Self::Armed => f.write_str("Armed"),
            Self::Running => f.write_str("Running"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// One status transition, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: String,
    pub status: ScriptStatus,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSnapshot {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub status: ScriptStatus,
    pub text: String,
}

/// Latest status per script, readable without the registry lock.
struct StatusBoard {
    current: RwLock<HashMap<String, StatusChange>>,
    events: broadcast::Sender<StatusChange>,
}

impl StatusBoard {
    fn new() -> Self {
        let (events, _) = broadcast::channel(STATUS_BUFFER);
        Self {
            current: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn set(&self, definition: &ScriptDefinition, status: ScriptStatus) {
        let change = StatusChange {
            id: definition.id.clone(),
            text: definition.describe(&status),
            status,
        };
        {
            let mut current = self.current.write();
            if current.get(&change.id) == Some(&change) {
                return;
            }
            current.insert(change.id.clone(), change.clone());
        }
        debug!(script = %change.id, status = %change.text, "status changed");
        // No subscribers is fine.
        let _ = self.events.send(change);
    }

    fn get(&self, id: &str) -> Option<StatusChange> {
        self.current.read().get(id).cloned()
    }
}

struct ScriptRuntime {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ScriptEntry {
    definition: Arc<ScriptDefinition>,
    enabled: bool,
    runtime: Option<ScriptRuntime>,
}

/// Registry of scripts and their running units.
pub struct Engine {
    registry: Mutex<HashMap<String, ScriptEntry>>,
    board: Arc<StatusBoard>,
    hub: InputHub,
    executor: SequenceExecutor,
    stop_timeout: Duration,
}

impl Engine {
    pub fn new(sink: Arc<dyn OutputSink>, hub: InputHub) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            board: Arc::new(StatusBoard::new()),
            hub,
            executor: SequenceExecutor::new(sink),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Bound on how long [`stop`](Self::stop) waits for a unit to wind down.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn hub(&self) -> &InputHub {
        &self.hub
    }

    /// Store `definition`. Replacing a script keeps its enabled flag but is
    /// refused while it is running.
    pub fn register(&self, definition: ScriptDefinition) -> Result<()> {
        definition.validate()?;
        let definition = Arc::new(definition);
        let mut registry = self.registry.lock();

        let enabled = match registry.get(&definition.id) {
            Some(existing) if existing.runtime.is_some() => {
                return Err(MkrError::already_running(&definition.id));
            }
            Some(existing) => existing.enabled,
            None => false,
        };

        let status = self
            .board
            .get(&definition.id)
            .map(|c| c.status)
            .unwrap_or(ScriptStatus::Inactive);
        self.board.set(&definition, status);

        debug!(script = %definition.id, policy = ?definition.policy, "script registered");
        registry.insert(
            definition.id.clone(),
            ScriptEntry {
                definition,
                enabled,
                runtime: None,
            },
        );
        Ok(())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.registry.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn enable(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(id)
            .ok_or_else(|| MkrError::unknown_script(id))?;
        entry.enabled = true;
        Ok(())
    }

    /// Clear the enabled flag and stop the script if it is running.
    pub async fn disable(&self, id: &str) -> Result<()> {
        let definition = {
            let mut registry = self.registry.lock();
            let entry = registry
                .get_mut(id)
                .ok_or_else(|| MkrError::unknown_script(id))?;
            entry.enabled = false;
            entry.definition.clone()
        };
        let stopped = self.stop(id).await;
        self.settle(&definition, ScriptStatus::Inactive);
        stopped
    }

    /// Subscribe the script to input and spawn its trigger task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(id)
            .ok_or_else(|| MkrError::unknown_script(id))?;
        if entry.runtime.is_some() {
            return Err(MkrError::already_running(id));
        }
        if !entry.enabled {
            return Err(MkrError::script_disabled(id));
        }

        let events = self.hub.subscribe(id);
        let cancel = CancellationToken::new();
        self.board.set(&entry.definition, ScriptStatus::Ready);

        let task = ScriptTask {
            definition: entry.definition.clone(),
            executor: self.executor.clone(),
            cancel: cancel.clone(),
            board: self.board.clone(),
        };
        let handle = tokio::spawn(task.run(events));
        entry.runtime = Some(ScriptRuntime { cancel, handle });

        info!(script = id, policy = ?entry.definition.policy, "script started");
        Ok(())
    }

    /// Cancel the script and wait, up to the stop timeout, for its unit to end.
    ///
    /// Stopping a script that is not running is a no-op. On timeout the
    /// registry entry is cleared anyway and the task is aborted.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let (definition, runtime) = {
            let mut registry = self.registry.lock();
            let entry = registry
                .get_mut(id)
                .ok_or_else(|| MkrError::unknown_script(id))?;
            let Some(runtime) = entry.runtime.take() else {
                return Ok(());
            };
            self.hub.unsubscribe(id);
            (entry.definition.clone(), runtime)
        };

        runtime.cancel.cancel();
        self.join_unit(&definition, runtime).await
    }

    /// Stop every running script. Returns the first failure after trying all.
    pub async fn stop_all(&self) -> Result<()> {
        let units: Vec<_> = {
            let mut registry = self.registry.lock();
            registry
                .values_mut()
                .filter_map(|entry| {
                    let runtime = entry.runtime.take()?;
                    self.hub.unsubscribe(&entry.definition.id);
                    Some((entry.definition.clone(), runtime))
                })
                .collect()
        };

        if units.is_empty() {
            debug!("stop_all: nothing running");
            return Ok(());
        }

        for (_, runtime) in &units {
            runtime.cancel.cancel();
        }

        let count = units.len();
        let mut first_error = None;
        for (definition, runtime) in units {
            if let Err(e) = self.join_unit(&definition, runtime).await {
                first_error.get_or_insert(e);
            }
        }

        info!(count, "all scripts stopped");
        first_error.map_or(Ok(()), Err)
    }

    async fn join_unit(&self, definition: &ScriptDefinition, mut runtime: ScriptRuntime) -> Result<()> {
        let id = definition.id.as_str();
        let result = match tokio::time::timeout(self.stop_timeout, &mut runtime.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(script = id, "script task ended abnormally: {}", e);
                Ok(())
            }
            Err(_) => {
                runtime.handle.abort();
                let waited_ms = u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(script = id, waited_ms, "script did not stop in time, aborted");
                Err(MkrError::stop_timeout(id, waited_ms))
            }
        };

        self.settle(definition, ScriptStatus::Stopped);
        info!(script = id, "script stopped");
        result
    }

    /// Record a post-stop status unless the script was started again while
    /// its old unit was being joined.
    fn settle(&self, definition: &ScriptDefinition, status: ScriptStatus) {
        let registry = self.registry.lock();
        let restarted = registry
            .get(&definition.id)
            .is_some_and(|e| e.runtime.is_some());
        if restarted {
            debug!(script = %definition.id, "restarted during stop, keeping its status");
            return;
        }
        self.board.set(definition, status);
    }

    /// Current status. Reads a snapshot and never waits on the registry.
    pub fn status(&self, id: &str) -> Result<ScriptStatus> {
        self.board
            .get(id)
            .map(|c| c.status)
            .ok_or_else(|| MkrError::unknown_script(id))
    }

    /// Current status as display text, e.g. `Running (Hold t)`.
    pub fn status_text(&self, id: &str) -> Result<String> {
        self.board
            .get(id)
            .map(|c| c.text)
            .ok_or_else(|| MkrError::unknown_script(id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.board.events.subscribe()
    }

    pub fn is_running(&self, id: &str) -> Result<bool> {
        self.registry
            .lock()
            .get(id)
            .map(|e| e.runtime.is_some())
            .ok_or_else(|| MkrError::unknown_script(id))
    }

    pub fn is_enabled(&self, id: &str) -> Result<bool> {
        self.registry
            .lock()
            .get(id)
            .map(|e| e.enabled)
            .ok_or_else(|| MkrError::unknown_script(id))
    }

    pub fn running_count(&self) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|e| e.runtime.is_some())
            .count()
    }

    /// Every registered script, sorted by id.
    pub fn snapshot(&self) -> Vec<ScriptSnapshot> {
        let registry = self.registry.lock();
        let mut rows: Vec<_> = registry
            .values()
            .map(|entry| {
                let def = &entry.definition;
                let change = self.board.get(&def.id);
                let status = change
                    .as_ref()
                    .map(|c| c.status.clone())
                    .unwrap_or(ScriptStatus::Inactive);
                ScriptSnapshot {
                    id: def.id.clone(),
                    name: def.display_name().to_string(),
                    enabled: entry.enabled,
                    running: entry.runtime.is_some(),
                    text: change.map(|c| c.text).unwrap_or_else(|| status.to_string()),
                    status,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Flat id to enabled-flag map, as persisted between sessions.
    pub fn enabled_flags(&self) -> BTreeMap<String, bool> {
        self.registry
            .lock()
            .iter()
            .map(|(id, e)| (id.clone(), e.enabled))
            .collect()
    }

    /// Apply persisted enabled flags. Disabling stops running scripts;
    /// unknown ids are skipped.
    pub async fn apply_enabled_flags(&self, flags: &BTreeMap<String, bool>) -> Result<()> {
        let mut first_error = None;
        for (id, &enabled) in flags {
            let outcome = if enabled {
                self.enable(id)
            } else {
                self.disable(id).await
            };
            match outcome {
                Ok(()) => {}
                Err(MkrError::UnknownScript(_)) => {
                    warn!(script = %id, "enabled flag for unknown script ignored");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Start every enabled script that is not running yet. Returns how many
    /// were started; individual failures are logged.
    pub fn start_enabled(&self) -> usize {
        let candidates: Vec<String> = self
            .registry
            .lock()
            .values()
            .filter(|e| e.enabled && e.runtime.is_none())
            .map(|e| e.definition.id.clone())
            .collect();

        let mut started = 0;
        for id in candidates {
            match self.start(&id) {
                Ok(()) => started += 1,
                Err(MkrError::AlreadyRunning(_)) => {}
                Err(e) => warn!(script = %id, "failed to start: {}", e),
            }
        }
        started
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for entry in self.registry.get_mut().values() {
            if let Some(runtime) = &entry.runtime {
                runtime.cancel.cancel();
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("scripts", &self.ids())
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

/// A spawned sequence run.
struct Unit {
    cancel: CancellationToken,
    handle: JoinHandle<Result<RunOutcome>>,
}

async fn wait_unit(
    unit: &mut Option<Unit>,
) -> std::result::Result<Result<RunOutcome>, JoinError> {
    match unit {
        Some(u) => (&mut u.handle).await,
        None => std::future::pending().await,
    }
}

/// Per-script trigger loop.
struct ScriptTask {
    definition: Arc<ScriptDefinition>,
    executor: SequenceExecutor,
    cancel: CancellationToken,
    board: Arc<StatusBoard>,
}

impl ScriptTask {
    async fn run(self, mut events: mpsc::UnboundedReceiver<InputEvent>) {
        let mut machine =
            TriggerMachine::new(self.definition.policy, self.definition.bindings.clone());
        let mut unit: Option<Unit> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                joined = wait_unit(&mut unit), if unit.is_some() => {
                    unit = None;
                    machine.sequence_finished();
                    self.unit_finished(joined, &machine);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!(script = %self.definition.id, "input subscription closed");
                        break;
                    };
                    let action = machine.on_event(&event);
                    self.apply(action, &mut unit, &machine).await;
                }
            }
        }

        if let Some(unit) = unit.take() {
            unit.cancel.cancel();
            let _ = unit.handle.await;
        }
        debug!(script = %self.definition.id, "script task exited");
    }

    async fn apply(&self, action: TriggerAction, unit: &mut Option<Unit>, machine: &TriggerMachine) {
        match action {
            TriggerAction::Ignore => {}
            TriggerAction::Arm => self.set_status(ScriptStatus::Armed),
            TriggerAction::Disarm => self.set_status(ScriptStatus::Ready),
            TriggerAction::Fire | TriggerAction::Start => {
                debug!(
                    script = %self.definition.id,
                    trigger = ?machine.armed_by(),
                    "sequence triggered"
                );
                let mode = if action == TriggerAction::Fire {
                    RunMode::Once
                } else {
                    RunMode::Repeat
                };
                self.launch(mode, unit);
            }
            TriggerAction::Stop => {
                if let Some(running) = unit.take() {
                    running.cancel.cancel();
                    if let Ok(Err(e)) = running.handle.await {
                        warn!(script = %self.definition.id, "sequence failed: {}", e);
                    }
                }
                self.set_status(ScriptStatus::from_trigger(machine.state()));
            }
        }
    }

    fn launch(&self, mode: RunMode, unit: &mut Option<Unit>) {
        if unit.is_some() {
            debug!(script = %self.definition.id, "execution unit already active");
            return;
        }

        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let executor = self.executor.clone();
        let definition = self.definition.clone();
        let handle =
            tokio::spawn(async move { executor.run(&definition.sequence, mode, &token).await });

        *unit = Some(Unit { cancel, handle });
        self.set_status(ScriptStatus::Running);
    }

    fn unit_finished(
        &self,
        joined: std::result::Result<Result<RunOutcome>, JoinError>,
        machine: &TriggerMachine,
    ) {
        let id = &self.definition.id;
        match joined {
            Ok(Ok(outcome)) => {
                debug!(script = %id, ?outcome, "sequence finished");
                self.set_status(ScriptStatus::from_trigger(machine.state()));
            }
            Ok(Err(e)) => {
                warn!(script = %id, "sequence failed: {}", e);
                self.set_status(ScriptStatus::Error(e.to_string()));
            }
            Err(e) => {
                error!(script = %id, "execution unit ended abnormally: {}", e);
                self.set_status(ScriptStatus::Error("execution unit panicked".to_string()));
            }
        }
    }

    fn set_status(&self, status: ScriptStatus) {
        self.board.set(&self.definition, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingSink;
    use crate::sequence::OutputAction;

    fn b(raw: &str) -> Binding {
        Binding::parse(raw).unwrap()
    }

    fn script(id: &str, policy: TriggerPolicy, trigger: &str) -> ScriptDefinition {
        ScriptDefinition::new(
            id,
            "",
            policy,
            vec![b(trigger)],
            Sequence::new(vec![OutputAction::tap(b("g"), Duration::from_millis(2))]),
        )
    }

    fn engine() -> (Engine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (Engine::new(sink.clone(), InputHub::new()), sink)
    }

    #[test]
    fn test_definition_validation() {
        assert!(script("ok", TriggerPolicy::Press, "r").validate().is_ok());
        assert!(script("", TriggerPolicy::Press, "r").validate().is_err());
        assert!(script("has space", TriggerPolicy::Press, "r").validate().is_err());

        let mut dup = script("dup", TriggerPolicy::HoldSpam, "r");
        dup.bindings.push(b("R"));
        assert!(dup.validate().is_err());

        let mut empty = script("empty", TriggerPolicy::Press, "r");
        empty.sequence = Sequence::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_describe_uses_labels() {
        let def = script("s", TriggerPolicy::ToggleHold, "t")
            .with_labels(Some("waiting".to_string()), Some("Running (Hold t)".to_string()));
        assert_eq!(def.describe(&ScriptStatus::Running), "Running (Hold t)");
        assert_eq!(def.describe(&ScriptStatus::Armed), "waiting");
        assert_eq!(def.describe(&ScriptStatus::Ready), "Ready");
        assert_eq!(
            def.describe(&ScriptStatus::Error("denied".to_string())),
            "Error: denied"
        );
        assert_eq!(def.display_name(), "s");
    }

    #[tokio::test]
    async fn test_registry_contract_errors() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.start("missing"),
            Err(MkrError::UnknownScript(_))
        ));
        assert!(matches!(
            engine.stop("missing").await,
            Err(MkrError::UnknownScript(_))
        ));
        assert!(engine.status("missing").is_err());

        engine.register(script("a", TriggerPolicy::Press, "r")).unwrap();
        assert_eq!(engine.status("a").unwrap(), ScriptStatus::Inactive);
        assert!(matches!(engine.start("a"), Err(MkrError::ScriptDisabled(_))));
    }

    #[tokio::test]
    async fn test_start_twice_is_already_running() {
        let (engine, _) = engine();
        engine.register(script("a", TriggerPolicy::Press, "r")).unwrap();
        engine.enable("a").unwrap();
        engine.start("a").unwrap();

        assert!(matches!(engine.start("a"), Err(MkrError::AlreadyRunning(_))));
        assert!(engine.is_running("a").unwrap());
        assert_eq!(engine.status("a").unwrap(), ScriptStatus::Ready);
        assert!(matches!(
            engine.register(script("a", TriggerPolicy::Press, "x")),
            Err(MkrError::AlreadyRunning(_))
        ));

        engine.stop("a").await.unwrap();
        assert!(!engine.is_running("a").unwrap());
        assert_eq!(engine.status("a").unwrap(), ScriptStatus::Stopped);
        engine.stop("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_disable_stops_and_unsubscribes() {
        let (engine, _) = engine();
        engine.register(script("a", TriggerPolicy::ToggleHold, "t")).unwrap();
        engine.enable("a").unwrap();
        engine.start("a").unwrap();
        assert!(engine.hub().is_subscribed("a"));

        engine.disable("a").await.unwrap();
        assert!(!engine.hub().is_subscribed("a"));
        assert!(!engine.is_running("a").unwrap());
        assert!(!engine.is_enabled("a").unwrap());
        assert_eq!(engine.status("a").unwrap(), ScriptStatus::Inactive);
    }

    #[tokio::test]
    async fn test_enabled_flags_roundtrip() {
        let (engine, _) = engine();
        engine.register(script("a", TriggerPolicy::Press, "r")).unwrap();
        engine.register(script("b", TriggerPolicy::Press, "q")).unwrap();

        let flags: BTreeMap<String, bool> = [("a", true), ("b", false), ("zzz", true)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        engine.apply_enabled_flags(&flags).await.unwrap();

        let current = engine.enabled_flags();
        assert_eq!(current.len(), 2);
        assert!(current["a"]);
        assert!(!current["b"]);

        assert_eq!(engine.start_enabled(), 1);
        assert_eq!(engine.running_count(), 1);
        assert_eq!(engine.start_enabled(), 0);
        engine.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_sorted() {
        let (engine, _) = engine();
        engine.register(script("b", TriggerPolicy::Press, "r")).unwrap();
        engine.register(script("a", TriggerPolicy::Press, "q")).unwrap();
        let rows = engine.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].text, "Inactive");
        assert!(!rows[1].running);
    }
}
