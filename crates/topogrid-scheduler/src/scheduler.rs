//! Scheduler — drains a dependency graph with a bounded worker pool.
//!
//! One coordinating task per node blocks on the node's Create gate and
//! hands the node to a shared queue once it is ready. A fixed number of
//! workers pull ready nodes off the queue and run the full pipeline:
//!
//! ```text
//! coordinator(node) ── enter Create ── external wait ──► queue
//!                                                          │
//!                 worker 0..N ◄────────────────────────────┘
//!                   delay → pre-deploy → deploy → runtime info → done(Create)
//!                   enter(CreateLinks) → endpoints → done(CreateLinks)
//!                   enter(Configure) → post-deploy → done(Configure)
//!                   exec → [Healthy poll] → [Exit poll]
//! ```
//!
//! The queue closes only after every coordinator has finished, so no
//! handoff is lost and workers drain everything that was queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use topo_core::{ContainerRuntime, DeployParams, ExecCollection, LabSettings};
use topogrid_deps::DependencyGraph;

use crate::error::SchedulerResult;
use crate::pipeline::{DeployContext, coordinate, worker};
use crate::report::{DeployReport, Halt, NodeOutcome, Step};

/// Tunables of one scheduling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// `None` runs one worker per node.
    pub max_workers: Option<usize>,
    pub skip_post_deploy: bool,
    pub health_poll_interval: Duration,
    pub exit_poll_interval: Duration,
    pub external_wait_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&LabSettings::default())
    }
}

impl From<&LabSettings> for SchedulerConfig {
    fn from(settings: &LabSettings) -> Self {
        Self {
            max_workers: settings.max_workers,
            skip_post_deploy: settings.skip_post_deploy,
            health_poll_interval: settings.health_poll_interval,
            exit_poll_interval: settings.exit_poll_interval,
            external_wait_timeout: settings.external_wait_timeout,
        }
    }
}

impl SchedulerConfig {
    /// `min(max_workers, nodes)`, at least one worker when there are nodes.
    pub fn worker_count(&self, nodes: usize) -> usize {
        if nodes == 0 {
            return 0;
        }
        self.max_workers.unwrap_or(nodes).clamp(1, nodes)
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    params: DeployParams,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        params: DeployParams,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            config,
            params,
            runtime,
        }
    }

    /// Start draining `graph`. The graph must be fully built; nothing adds
    /// edges once scheduling starts.
    pub fn schedule(&self, graph: DependencyGraph, cancel: CancellationToken) -> ScheduleHandle {
        let graph = Arc::new(graph);
        let exec_log = Arc::new(ExecCollection::new());
        let outcomes = graph
            .names()
            .map(|name| (name.to_string(), NodeOutcome::default()))
            .collect();

        let ctx = Arc::new(DeployContext {
            graph: graph.clone(),
            config: self.config.clone(),
            params: self.params.clone(),
            runtime: self.runtime.clone(),
            exec_log: exec_log.clone(),
            outcomes: Mutex::new(outcomes),
            cancel,
        });

        let node_count = graph.len();
        let workers = self.config.worker_count(node_count);
        let (tx, rx) = mpsc::channel::<String>(node_count.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut coordinators = JoinSet::new();
        for name in graph.names() {
            coordinators.spawn(coordinate(ctx.clone(), name.to_string(), tx.clone()));
        }
        // Close the queue once every coordinator is done handing off.
        let dispatcher = tokio::spawn(async move {
            let mut result = Ok(());
            while let Some(joined) = coordinators.join_next().await {
                if let Err(e) = joined {
                    result = Err(e);
                }
            }
            drop(tx);
            debug!("all nodes handed off, closing worker queue");
            result
        });

        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(worker(ctx.clone(), id, rx.clone()));
        }

        info!(nodes = node_count, workers, "scheduling nodes");
        ScheduleHandle {
            ctx,
            dispatcher,
            pool,
        }
    }
}

/// A running deployment.
pub struct ScheduleHandle {
    ctx: Arc<DeployContext>,
    dispatcher: JoinHandle<Result<(), tokio::task::JoinError>>,
    pool: JoinSet<()>,
}

impl ScheduleHandle {
    /// Exec results collected so far.
    pub fn exec_log(&self) -> Arc<ExecCollection> {
        self.ctx.exec_log.clone()
    }

    /// Wait until every coordinator and worker has finished.
    pub async fn wait(mut self) -> SchedulerResult<DeployReport> {
        self.dispatcher.await??;
        while let Some(joined) = self.pool.join_next().await {
            joined?;
        }

        let mut outcomes = std::mem::take(&mut *self.ctx.outcomes.lock().await);
        for (name, outcome) in outcomes.iter_mut() {
            if outcome.finished {
                continue;
            }
            // Only reachable through cancellation: the node was queued but
            // no worker picked it up.
            outcome.halted = Some(Halt {
                step: Step::Cancelled,
                reason: "not scheduled before cancellation".to_string(),
            });
            if let Some(dn) = self.ctx.graph.node(name) {
                dn.abandon_remaining("not scheduled");
            }
        }
        Ok(DeployReport { nodes: outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_bounded() {
        let cfg = SchedulerConfig {
            max_workers: Some(2),
            ..Default::default()
        };
        assert_eq!(cfg.worker_count(5), 2);
        assert_eq!(cfg.worker_count(1), 1);
        assert_eq!(cfg.worker_count(0), 0);

        let unbounded = SchedulerConfig::default();
        assert_eq!(unbounded.worker_count(7), 7);

        let zero = SchedulerConfig {
            max_workers: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.worker_count(3), 1);
    }

    #[test]
    fn config_follows_lab_settings() {
        let settings = LabSettings {
            max_workers: Some(4),
            skip_post_deploy: true,
            health_poll_interval: Duration::from_millis(250),
            ..Default::default()
        };
        let cfg = SchedulerConfig::from(&settings);
        assert_eq!(cfg.max_workers, Some(4));
        assert!(cfg.skip_post_deploy);
        assert_eq!(cfg.health_poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.external_wait_timeout, Duration::from_secs(900));
    }
}
