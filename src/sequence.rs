//! Output sequences and the cancellable executor that plays them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::duration_format;
use crate::error::Result;
use crate::key::Binding;
use crate::output::OutputSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Press,
    Release,
    /// Press, wait `hold`, release.
    Tap,
}

/// One timed step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAction {
    pub action: ActionKind,
    pub key: Binding,
    #[serde(default, with = "duration_format", skip_serializing_if = "Duration::is_zero")]
    pub before: Duration,
    #[serde(default, with = "duration_format", skip_serializing_if = "Duration::is_zero")]
    pub hold: Duration,
    #[serde(default, with = "duration_format", skip_serializing_if = "Duration::is_zero")]
    pub after: Duration,
}

impl OutputAction {
    fn new(action: ActionKind, key: Binding) -> Self {
        Self {
            action,
            key,
            before: Duration::ZERO,
            hold: Duration::ZERO,
            after: Duration::ZERO,
        }
    }

    /// Press `key`, then wait `after`.
    pub fn press(key: Binding, after: Duration) -> Self {
        Self::new(ActionKind::Press, key).with_after(after)
    }

    pub fn release(key: Binding) -> Self {
        Self::new(ActionKind::Release, key)
    }

    pub fn tap(key: Binding, hold: Duration) -> Self {
        Self {
            hold,
            ..Self::new(ActionKind::Tap, key)
        }
    }

    pub fn with_before(mut self, before: Duration) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: Duration) -> Self {
        self.after = after;
        self
    }
}

/// Ordered steps plus the pause between repetitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub steps: Vec<OutputAction>,
    #[serde(default, with = "duration_format")]
    pub cycle_gap: Duration,
}

impl Sequence {
    pub fn new(steps: Vec<OutputAction>) -> Self {
        Self {
            steps,
            cycle_gap: Duration::ZERO,
        }
    }

    pub fn with_cycle_gap(mut self, gap: Duration) -> Self {
        self.cycle_gap = gap;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Number of sink primitives one pass emits.
    pub fn primitive_count(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s.action {
                ActionKind::Tap => 2,
                _ => 1,
            })
            .sum()
    }

    /// Wall time of one pass, ignoring sink latency.
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .map(|s| s.before + s.hold + s.after)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Once,
    /// Loop until cancelled.
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Sleep for `duration` unless `token` fires first. Returns false on cancel.
async fn pause(duration: Duration, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return !token.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Plays sequences against a shared [`OutputSink`].
#[derive(Clone)]
pub struct SequenceExecutor {
    sink: Arc<dyn OutputSink>,
}

impl SequenceExecutor {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }

    /// Run `sequence` until it completes (`Once`) or `token` is cancelled.
    ///
    /// No sink call is issued once the token has been observed cancelled.
    /// Partially applied presses are left as they are. A sink error aborts
    /// the run and is returned as is.
    pub async fn run(
        &self,
        sequence: &Sequence,
        mode: RunMode,
        token: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            trace!(iteration, "sequence pass");
            if self.run_pass(sequence, token).await? == RunOutcome::Cancelled {
                debug!(iteration, "sequence cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            if mode == RunMode::Once {
                return Ok(RunOutcome::Completed);
            }
            if !pause(sequence.cycle_gap, token).await {
                debug!(iteration, "sequence cancelled between passes");
                return Ok(RunOutcome::Cancelled);
            }
        }
    }

    async fn run_pass(&self, sequence: &Sequence, token: &CancellationToken) -> Result<RunOutcome> {
        for step in &sequence.steps {
            if !step.before.is_zero() && !pause(step.before, token).await {
                return Ok(RunOutcome::Cancelled);
            }
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            match step.action {
                ActionKind::Press => self.sink.press(&step.key)?,
                ActionKind::Release => self.sink.release(&step.key)?,
                ActionKind::Tap => {
                    self.sink.press(&step.key)?;
                    if !pause(step.hold, token).await {
                        return Ok(RunOutcome::Cancelled);
                    }
                    self.sink.release(&step.key)?;
                }
            }

            if !step.after.is_zero() && !pause(step.after, token).await {
                return Ok(RunOutcome::Cancelled);
            }
        }
        Ok(RunOutcome::Completed)
    }
}

impl std::fmt::Debug for SequenceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MkrError;
    use crate::output::{RecordingSink, SinkOp};
    use std::time::Instant;

    fn b(raw: &str) -> Binding {
        Binding::parse(raw).unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn test_once_runs_steps_in_order() {
        let sink = Arc::new(RecordingSink::new());
        let exec = SequenceExecutor::new(sink.clone());
        let seq = Sequence::new(vec![
            OutputAction::press(b("g"), ms(5)),
            OutputAction::release(b("g")),
            OutputAction::tap(b("v"), ms(5)),
        ]);

        let outcome = exec
            .run(&seq, RunMode::Once, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        let calls = sink.calls();
        let trace: Vec<_> = calls.iter().map(|c| (c.op, c.binding.as_str())).collect();
        assert_eq!(
            trace,
            vec![
                (SinkOp::Press, "g"),
                (SinkOp::Release, "g"),
                (SinkOp::Press, "v"),
                (SinkOp::Release, "v"),
            ]
        );
        assert!(calls[1].at.duration_since(calls[0].at) >= ms(5));
    }

    #[tokio::test]
    async fn test_before_delay_is_honoured() {
        let sink = Arc::new(RecordingSink::new());
        let exec = SequenceExecutor::new(sink.clone());
        let seq = Sequence::new(vec![OutputAction::tap(b("2"), ms(1)).with_before(ms(30))]);

        let started = Instant::now();
        exec.run(&seq, RunMode::Once, &CancellationToken::new())
            .await
            .unwrap();

        assert!(sink.calls()[0].at.duration_since(started) >= ms(30));
    }

    #[tokio::test]
    async fn test_cancel_before_start_emits_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let exec = SequenceExecutor::new(sink.clone());
        let token = CancellationToken::new();
        token.cancel();

        let seq = Sequence::new(vec![OutputAction::tap(b("g"), ms(1))]);
        let outcome = exec.run(&seq, RunMode::Repeat, &token).await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_long_delay_is_prompt() {
        let sink = Arc::new(RecordingSink::new());
        let exec = SequenceExecutor::new(sink.clone());
        let token = CancellationToken::new();
        let seq = Sequence::new(vec![
            OutputAction::press(b("g"), Duration::from_secs(10)),
            OutputAction::release(b("g")),
        ]);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome = exec.run(&seq, RunMode::Once, &token).await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_loops_until_cancelled() {
        let sink = Arc::new(RecordingSink::new());
        let exec = SequenceExecutor::new(sink.clone());
        let token = CancellationToken::new();
        let seq = Sequence::new(vec![OutputAction::tap(b("e"), ms(2))]).with_cycle_gap(ms(1));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(60)).await;
            canceller.cancel();
        });

        let outcome = exec.run(&seq, RunMode::Repeat, &token).await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(sink.len() >= 4);

        let settled = sink.len();
        tokio::time::sleep(ms(30)).await;
        assert_eq!(sink.len(), settled);
    }

    #[tokio::test]
    async fn test_sink_failure_aborts_iteration() {
        let sink = Arc::new(RecordingSink::failing_on(b("v")));
        let exec = SequenceExecutor::new(sink.clone());
        let seq = Sequence::new(vec![
            OutputAction::tap(b("g"), ms(1)),
            OutputAction::tap(b("v"), ms(1)),
            OutputAction::tap(b("x"), ms(1)),
        ]);

        let err = exec
            .run(&seq, RunMode::Repeat, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MkrError::OutputSinkFailure { .. }));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_sequence_metrics() {
        let seq = Sequence::new(vec![
            OutputAction::tap(b("g"), ms(10)).with_after(ms(10)),
            OutputAction::press(b("v"), ms(5)),
            OutputAction::release(b("v")).with_before(ms(3)),
        ]);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.primitive_count(), 4);
        assert_eq!(seq.duration(), ms(28));
    }

    #[test]
    fn test_action_json() {
        let json = r#"{"action": "tap", "key": "Space", "hold": "10ms", "after": "1s"}"#;
        let action: OutputAction = serde_json::from_str(json).unwrap();
        assert_eq!(action.action, ActionKind::Tap);
        assert_eq!(action.key.as_str(), "space");
        assert_eq!(action.hold, ms(10));
        assert_eq!(action.after, Duration::from_secs(1));
        assert_eq!(action.before, Duration::ZERO);
    }
}
