//! Graph node wrapping one [`Node`] capability.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use topo_core::exec::run_host_exec;
use topo_core::{ExecCmd, ExecCollection, ExecPhase, ExecTarget, Node, Stage, StageExec};

use crate::gate::{GateOutcome, StageGate};

/// A node released when a dependee finishes one of its stages.
#[derive(Debug, Clone)]
pub struct Depender {
    pub node: String,
    pub stage: Stage,
    gate: Arc<StageGate>,
}

pub struct DependencyNode {
    node: Arc<dyn Node>,
    gates: [Arc<StageGate>; 5],
    must_wait: [bool; 5],
    dependers: [Vec<Depender>; 5],
    released: [AtomicBool; 5],
}

impl DependencyNode {
    pub fn new(node: Arc<dyn Node>) -> Self {
        let stages = &node.config().stages;
        // Stages with exec hooks are always entered so their hooks run.
        let must_wait = Stage::ALL.map(|stage| {
            matches!(
                stage,
                Stage::CreateLinks | Stage::Configure | Stage::Healthy
            ) && stages.has_execs(stage)
        });
        Self {
            node,
            gates: Default::default(),
            must_wait,
            dependers: Default::default(),
            released: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.node.short_name()
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn gate(&self, stage: Stage) -> &Arc<StageGate> {
        &self.gates[stage.index()]
    }

    pub fn dependers(&self, stage: Stage) -> &[Depender] {
        &self.dependers[stage.index()]
    }

    /// Whether anything (a depender or an exec hook) needs this stage entered.
    pub fn must_wait(&self, stage: Stage) -> bool {
        self.must_wait[stage.index()]
    }

    /// Record that `depender` waits on `stage` of this node. The caller
    /// increments the depender's gate.
    pub(crate) fn push_depender(
        &mut self,
        stage: Stage,
        depender: &str,
        depender_stage: Stage,
        gate: Arc<StageGate>,
    ) {
        self.must_wait[stage.index()] = true;
        self.dependers[stage.index()].push(Depender {
            node: depender.to_string(),
            stage: depender_stage,
            gate,
        });
    }

    /// Wait for the stage gate, then run the stage's on-enter hooks.
    pub async fn enter_stage(
        &self,
        stage: Stage,
        log: &ExecCollection,
        cancel: &CancellationToken,
    ) -> GateOutcome {
        debug!(node = %self.name(), %stage, pending = self.gate(stage).pending(), "waiting on stage gate");
        let outcome = self.gate(stage).wait(cancel).await;
        if outcome == GateOutcome::Open {
            debug!(node = %self.name(), %stage, "entered stage");
            self.run_hooks(stage, ExecPhase::OnEnter, log).await;
        }
        outcome
    }

    /// Run the stage's on-exit hooks, then release every depender of the
    /// stage. Releasing happens at most once per stage.
    pub async fn done(&self, stage: Stage, log: &ExecCollection) {
        self.run_hooks(stage, ExecPhase::OnExit, log).await;
        if self.released[stage.index()].swap(true, Ordering::SeqCst) {
            return;
        }
        for depender in self.dependers(stage) {
            depender.gate.signal();
        }
        debug!(node = %self.name(), %stage, dependers = self.dependers(stage).len(), "stage done");
    }

    /// Release the dependers of every stage not yet done with a failure
    /// mark, so nobody waits on a stage that will never complete.
    pub fn abandon_remaining(&self, reason: &str) {
        for stage in Stage::ALL {
            self.abandon(stage, reason);
        }
    }

    pub fn abandon(&self, stage: Stage, reason: &str) {
        if self.released[stage.index()].swap(true, Ordering::SeqCst) {
            return;
        }
        let dependers = self.dependers(stage);
        if !dependers.is_empty() {
            warn!(node = %self.name(), %stage, dependers = dependers.len(), %reason, "abandoning stage");
        }
        for depender in dependers {
            depender.gate.signal_failed(self.name());
        }
    }

    pub fn is_done(&self, stage: Stage) -> bool {
        self.released[stage.index()].load(Ordering::SeqCst)
    }

    async fn run_hooks(&self, stage: Stage, phase: ExecPhase, log: &ExecCollection) {
        let hooks: Vec<StageExec> = self
            .node
            .config()
            .stages
            .execs(stage, phase)
            .cloned()
            .collect();
        for hook in hooks {
            let cmd = match ExecCmd::parse(&hook.command) {
                Ok(cmd) => cmd,
                Err(e) => {
                    error!(node = %self.name(), %stage, error = %e, "invalid stage exec command");
                    continue;
                }
            };
            match hook.target {
                ExecTarget::Container => match self.node.run_exec(&cmd).await {
                    Ok(result) => log.add(self.name(), result),
                    Err(e) => {
                        error!(node = %self.name(), %stage, cmd = %hook.command, error = %e, "stage exec failed")
                    }
                },
                ExecTarget::Host => match run_host_exec(&cmd).await {
                    Ok(result) => log.add(&format!("host via {}", self.name()), result),
                    Err(e) => {
                        error!(node = %self.name(), %stage, cmd = %hook.command, error = %e, "host exec failed")
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use topo_core::testing::{FakeNode, FakeRuntime};
    use topo_core::Stages;

    use super::*;

    fn fake(name: &str, stages: Stages) -> (Arc<FakeNode>, DependencyNode) {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let node = Arc::new(FakeNode::new(name, "t", rt).with_stages(stages));
        let dn = DependencyNode::new(node.clone());
        (node, dn)
    }

    #[test]
    fn stages_with_hooks_must_wait() {
        let mut stages = Stages::default();
        stages.configure.exec.push(StageExec {
            command: "echo hi".into(),
            target: ExecTarget::Container,
            phase: ExecPhase::OnEnter,
        });
        stages.create.exec.push(StageExec {
            command: "echo create".into(),
            target: ExecTarget::Container,
            phase: ExecPhase::OnEnter,
        });
        let (_, dn) = fake("a", stages);
        assert!(dn.must_wait(Stage::Configure));
        assert!(!dn.must_wait(Stage::Create));
        assert!(!dn.must_wait(Stage::Healthy));
    }

    #[tokio::test]
    async fn hooks_run_on_enter_and_exit() {
        let mut stages = Stages::default();
        stages.configure.exec.push(StageExec {
            command: "echo enter".into(),
            target: ExecTarget::Container,
            phase: ExecPhase::OnEnter,
        });
        stages.configure.exec.push(StageExec {
            command: "echo leave".into(),
            target: ExecTarget::Host,
            phase: ExecPhase::OnExit,
        });
        let (node, dn) = fake("a", stages);
        let log = ExecCollection::new();

        let outcome = dn
            .enter_stage(Stage::Configure, &log, &CancellationToken::new())
            .await;
        assert_eq!(outcome, GateOutcome::Open);
        assert!(node.events().contains("a:exec echo enter"));
        assert_eq!(log.results_for("a").len(), 1);

        dn.done(Stage::Configure, &log).await;
        let host = log.results_for("host via a");
        assert_eq!(host.len(), 1);
        assert_eq!(host[0].stdout.trim(), "leave");
    }

    #[tokio::test]
    async fn done_signals_dependers_once() {
        let (_, mut a) = fake("a", Stages::default());
        let (_, b) = fake("b", Stages::default());
        let gate = b.gate(Stage::Create).clone();
        gate.add_dependency();
        gate.add_dependency();
        a.push_depender(Stage::Create, "b", Stage::Create, gate.clone());

        let log = ExecCollection::new();
        a.done(Stage::Create, &log).await;
        a.done(Stage::Create, &log).await;
        a.abandon(Stage::Create, "late");
        assert_eq!(gate.pending(), 1);
        assert!(a.is_done(Stage::Create));
    }

    #[tokio::test]
    async fn abandon_marks_dependers_failed() {
        let (_, mut a) = fake("a", Stages::default());
        let (_, b) = fake("b", Stages::default());
        let gate = b.gate(Stage::Configure).clone();
        gate.add_dependency();
        a.push_depender(Stage::Healthy, "b", Stage::Configure, gate.clone());
        assert!(a.must_wait(Stage::Healthy));

        a.abandon_remaining("deploy failed");
        assert_eq!(
            b.enter_stage(Stage::Configure, &ExecCollection::new(), &CancellationToken::new())
                .await,
            GateOutcome::Failed(vec!["a".to_string()])
        );
    }
}
