//! The per-node deployment pipeline and the coordinating task that hands a
//! node to the worker pool once its Create gate opens.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use topo_core::{ContainerRuntime, ContainerStatus, DeployParams, ExecCollection, Stage};
use topogrid_deps::{DependencyGraph, DependencyNode, GateOutcome};

use crate::external::{ExternalWait, wait_for_external_namespace};
use crate::report::{Halt, NodeOutcome, Step};
use crate::scheduler::SchedulerConfig;

/// State shared by every coordinator and worker of one deployment.
pub(crate) struct DeployContext {
    pub graph: Arc<DependencyGraph>,
    pub config: SchedulerConfig,
    pub params: DeployParams,
    /// Runtime used to look up containers outside the topology.
    pub runtime: Arc<dyn ContainerRuntime>,
    pub exec_log: Arc<ExecCollection>,
    pub outcomes: Mutex<BTreeMap<String, NodeOutcome>>,
    pub cancel: CancellationToken,
}

enum HealthPoll {
    Healthy,
    Failed(String),
    Cancelled,
}

impl DeployContext {
    async fn complete(&self, dn: &DependencyNode, stage: Stage) {
        dn.done(stage, &self.exec_log).await;
        let mut outcomes = self.outcomes.lock().await;
        outcomes
            .entry(dn.name().to_string())
            .or_default()
            .completed
            .push(stage);
    }

    /// Stop the node's pipeline and release everything still waiting on it.
    async fn halt(&self, dn: &DependencyNode, step: Step, reason: impl Display) {
        let reason = reason.to_string();
        if step == Step::Cancelled {
            debug!(node = %dn.name(), %reason, "node pipeline cancelled");
        } else {
            error!(node = %dn.name(), %step, %reason, "node pipeline halted");
        }
        dn.abandon_remaining(&reason);
        let mut outcomes = self.outcomes.lock().await;
        let outcome = outcomes.entry(dn.name().to_string()).or_default();
        outcome.halted = Some(Halt { step, reason });
        outcome.finished = true;
    }

    async fn abandon(&self, dn: &DependencyNode, stage: Stage, reason: &str) {
        dn.abandon(stage, reason);
        let mut outcomes = self.outcomes.lock().await;
        outcomes
            .entry(dn.name().to_string())
            .or_default()
            .abandoned
            .push(stage);
    }

    async fn finish(&self, dn: &DependencyNode) {
        let mut outcomes = self.outcomes.lock().await;
        outcomes.entry(dn.name().to_string()).or_default().finished = true;
    }

    /// Enter `stage`, halting the node when the gate fails or the
    /// deployment is cancelled. Returns whether the pipeline continues.
    async fn enter(&self, dn: &DependencyNode, stage: Stage) -> bool {
        match dn.enter_stage(stage, &self.exec_log, &self.cancel).await {
            GateOutcome::Open => true,
            GateOutcome::Failed(dependees) => {
                let reason = format!("dependees gave up: {}", dependees.join(", "));
                self.halt(dn, Step::Dependency(stage), reason).await;
                false
            }
            GateOutcome::Cancelled => {
                self.halt(dn, Step::Cancelled, format!("cancelled before entering {stage}"))
                    .await;
                false
            }
        }
    }

    /// Await one node operation unless the deployment is cancelled first,
    /// in which case the operation is dropped and the node halted.
    async fn cancellable<T>(
        &self,
        dn: &DependencyNode,
        what: &str,
        op: impl Future<Output = T>,
    ) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.halt(dn, Step::Cancelled, format!("cancelled during {what}")).await;
                None
            }
            out = op => Some(out),
        }
    }

    async fn sleep(&self, period: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(period) => true,
        }
    }

    async fn poll_healthy(&self, dn: &DependencyNode) -> HealthPoll {
        loop {
            let healthy = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return HealthPoll::Cancelled,
                healthy = dn.node().is_healthy() => healthy,
            };
            match healthy {
                Ok(true) => return HealthPoll::Healthy,
                Ok(false) => debug!(node = %dn.name(), "not healthy yet"),
                Err(e) => return HealthPoll::Failed(e.to_string()),
            }
            if !self.sleep(self.config.health_poll_interval).await {
                return HealthPoll::Cancelled;
            }
        }
    }

    /// Poll until the container stopped. Returns false on cancellation.
    async fn poll_exited(&self, dn: &DependencyNode) -> bool {
        loop {
            let status = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                status = dn.node().container_status() => status,
            };
            if status == ContainerStatus::Stopped {
                return true;
            }
            if !self.sleep(self.config.exit_poll_interval).await {
                return false;
            }
        }
    }
}

/// Wait for the node's Create gate and any external namespace provider,
/// then queue the node for a worker. Blocked nodes never hold a worker.
pub(crate) async fn coordinate(ctx: Arc<DeployContext>, name: String, queue: mpsc::Sender<String>) {
    let Some(dn) = ctx.graph.node(&name) else {
        return;
    };
    if !ctx.enter(dn, Stage::Create).await {
        return;
    }

    let wait = wait_for_external_namespace(
        dn.node().config(),
        |provider| ctx.graph.node(provider).is_some(),
        ctx.runtime.as_ref(),
        ctx.config.health_poll_interval,
        ctx.config.external_wait_timeout,
        &ctx.cancel,
    )
    .await;
    if wait == ExternalWait::Cancelled {
        ctx.halt(dn, Step::Cancelled, "cancelled while waiting for external namespace")
            .await;
        return;
    }

    debug!(node = %name, "handing node to worker pool");
    if queue.send(name).await.is_err() {
        ctx.halt(dn, Step::Cancelled, "worker pool closed").await;
    }
}

/// Pull nodes off the shared queue until it closes or the deployment is
/// cancelled.
pub(crate) async fn worker(
    ctx: Arc<DeployContext>,
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
) {
    debug!(worker = id, "worker started");
    loop {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                name = rx.recv() => name,
            }
        };
        let Some(name) = next else {
            break;
        };
        let Some(dn) = ctx.graph.node(&name) else {
            continue;
        };
        run_node(&ctx, dn, id).await;
    }
    debug!(worker = id, "worker finished");
}

/// Drive one node from its startup delay through the optional exit wait.
/// Any failure halts this node only.
pub(crate) async fn run_node(ctx: &DeployContext, dn: &DependencyNode, worker: usize) {
    let node = dn.node();
    let name = dn.name();
    let delay = node.config().startup_delay;

    if delay > 0 {
        info!(node = %name, delay_secs = delay, "delaying node creation");
        if !ctx.sleep(Duration::from_secs(delay)).await {
            ctx.halt(dn, Step::Cancelled, "cancelled during startup delay").await;
            return;
        }
    }

    debug!(node = %name, worker, "creating node");
    let Some(pre_deployed) = ctx
        .cancellable(dn, "pre-deploy", node.pre_deploy(&ctx.params))
        .await
    else {
        return;
    };
    if let Err(e) = pre_deployed {
        ctx.halt(dn, Step::PreDeploy, e).await;
        return;
    }
    let Some(deployed) = ctx.cancellable(dn, "deploy", node.deploy(&ctx.params)).await else {
        return;
    };
    if let Err(e) = deployed {
        ctx.halt(dn, Step::Deploy, e).await;
        return;
    }
    let Some(refreshed) = ctx
        .cancellable(dn, "runtime info refresh", node.update_config_with_runtime_info())
        .await
    else {
        return;
    };
    if let Err(e) = refreshed {
        error!(node = %name, error = %e, "failed to refresh runtime info");
    }
    ctx.complete(dn, Stage::Create).await;

    if !ctx.enter(dn, Stage::CreateLinks).await {
        return;
    }
    let Some(linked) = ctx
        .cancellable(dn, "endpoint creation", node.deploy_endpoints())
        .await
    else {
        return;
    };
    if let Err(e) = linked {
        ctx.halt(dn, Step::DeployEndpoints, e).await;
        return;
    }
    ctx.complete(dn, Stage::CreateLinks).await;

    if !ctx.enter(dn, Stage::Configure).await {
        return;
    }
    if ctx.config.skip_post_deploy {
        debug!(node = %name, "skipping post-deploy");
    } else {
        let Some(configured) = ctx
            .cancellable(dn, "post-deploy", node.post_deploy(&ctx.params))
            .await
        else {
            return;
        };
        if let Err(e) = configured {
            error!(node = %name, error = %e, "post-deploy failed");
        }
    }
    ctx.complete(dn, Stage::Configure).await;

    let Some(executed) = ctx
        .cancellable(dn, "exec commands", node.run_exec_from_config(&ctx.exec_log))
        .await
    else {
        return;
    };
    if let Err(e) = executed {
        error!(node = %name, error = %e, "failed to run exec commands");
    }

    if dn.must_wait(Stage::Healthy) {
        if !ctx.enter(dn, Stage::Healthy).await {
            return;
        }
        match ctx.poll_healthy(dn).await {
            HealthPoll::Healthy => {
                info!(node = %name, "node is healthy");
                ctx.complete(dn, Stage::Healthy).await;
            }
            HealthPoll::Failed(e) => {
                error!(node = %name, error = %e, "health check failed");
                ctx.abandon(dn, Stage::Healthy, &e).await;
            }
            HealthPoll::Cancelled => {
                ctx.halt(dn, Step::Cancelled, "cancelled while waiting for health").await;
                return;
            }
        }
    }

    if dn.must_wait(Stage::Exit) {
        if !ctx.enter(dn, Stage::Exit).await {
            return;
        }
        if !ctx.poll_exited(dn).await {
            ctx.halt(dn, Step::Cancelled, "cancelled while waiting for exit").await;
            return;
        }
        info!(node = %name, "node exited");
        ctx.complete(dn, Stage::Exit).await;
    }

    ctx.finish(dn).await;
    debug!(node = %name, worker, "node pipeline finished");
}
