//! Per-stage countdown gate.
//!
//! A gate counts outstanding dependee edges. Edges are registered while the
//! graph is built, strictly before any task waits. Each dependee signals
//! exactly once; the gate opens when the count reaches zero and never
//! closes again.
//!
//! A dependee that will never complete its stage signals with a failure
//! mark instead. The count still drops, so waiters wake up, but they learn
//! which dependees gave up.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GateState {
    pending: usize,
    failed: Vec<String>,
}

/// Result of waiting on a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Every dependee completed its stage.
    Open,
    /// The count reached zero but at least one dependee abandoned its stage.
    Failed(Vec<String>),
    Cancelled,
}

#[derive(Debug)]
pub struct StageGate {
    state: watch::Sender<GateState>,
}

impl Default for StageGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StageGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self { state }
    }

    /// Register one more dependee edge.
    pub fn add_dependency(&self) {
        self.state.send_modify(|s| s.pending += 1);
    }

    /// One dependee finished its stage.
    pub fn signal(&self) {
        self.state
            .send_modify(|s| s.pending = s.pending.saturating_sub(1));
    }

    /// One dependee abandoned its stage.
    pub fn signal_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.state.send_modify(|s| {
            s.pending = s.pending.saturating_sub(1);
            s.failed.push(reason);
        });
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending
    }

    pub fn is_open(&self) -> bool {
        self.pending() == 0
    }

    /// Block until the count reaches zero or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> GateOutcome {
        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => GateOutcome::Cancelled,
            res = rx.wait_for(|s| s.pending == 0) => match res {
                Ok(state) if state.failed.is_empty() => GateOutcome::Open,
                Ok(state) => GateOutcome::Failed(state.failed.clone()),
                // The sender lives in `self`, so this cannot happen while we wait.
                Err(_) => GateOutcome::Cancelled,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fresh_gate_is_open() {
        let gate = StageGate::new();
        assert!(gate.is_open());
        assert_eq!(gate.wait(&CancellationToken::new()).await, GateOutcome::Open);
    }

    #[tokio::test]
    async fn opens_after_all_signals() {
        let gate = Arc::new(StageGate::new());
        gate.add_dependency();
        gate.add_dependency();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(&CancellationToken::new()).await })
        };

        gate.signal();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(gate.pending(), 1);

        gate.signal();
        assert_eq!(waiter.await.unwrap(), GateOutcome::Open);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_signals_reach_exactly_zero() {
        let gate = Arc::new(StageGate::new());
        let n = 64;
        for _ in 0..n {
            gate.add_dependency();
        }

        let mut tasks = Vec::new();
        for i in 0..n {
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis((i % 7) as u64)).await;
                gate.signal();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(gate.pending(), 0);
        assert_eq!(gate.wait(&CancellationToken::new()).await, GateOutcome::Open);
    }

    #[tokio::test]
    async fn failure_marks_are_reported() {
        let gate = StageGate::new();
        gate.add_dependency();
        gate.add_dependency();
        gate.signal();
        gate.signal_failed("r1");
        assert_eq!(
            gate.wait(&CancellationToken::new()).await,
            GateOutcome::Failed(vec!["r1".to_string()])
        );
    }

    #[tokio::test]
    async fn cancellation_releases_waiter() {
        let gate = Arc::new(StageGate::new());
        gate.add_dependency();
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait(&cancel).await })
        };
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), GateOutcome::Cancelled);
        assert_eq!(gate.pending(), 1);
    }

    #[test]
    fn extra_signals_do_not_underflow() {
        let gate = StageGate::new();
        gate.signal();
        assert_eq!(gate.pending(), 0);
    }
}
