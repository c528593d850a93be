//! Batch stop, start, and restart of lab nodes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use topo_core::{ContainerStatus, Lab, Node};
use topogrid_netns::{NamespaceOps, NetlinkNamespaces};

use crate::error::{LifecycleError, LifecycleResult};
use crate::lock::{LabLock, lock_path};
use crate::transition::{start_node, stop_node};
use crate::validate::{namespace_providers, validate_node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Stop,
    Start,
    Restart,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Stop => "stop",
            Operation::Start => "start",
            Operation::Restart => "restart",
        }
    }
}

/// Stops and starts nodes of one lab while keeping their dataplane links.
///
/// Every batch holds the lab lock for its whole duration, resolves links
/// first, and stops at the first node that fails.
pub struct LifecycleController {
    lab: Arc<Lab>,
    ns: Arc<dyn NamespaceOps>,
}

impl LifecycleController {
    pub fn new(lab: Arc<Lab>, ns: Arc<dyn NamespaceOps>) -> Self {
        Self { lab, ns }
    }

    /// Controller operating on the host's namespaces under the lab's
    /// configured namespace directory.
    pub fn with_netlink(lab: Arc<Lab>) -> Self {
        let ns = Arc::new(NetlinkNamespaces::new(lab.settings.netns_dir.clone()));
        Self::new(lab, ns)
    }

    /// Stop running nodes, parking their interfaces. An empty list means
    /// every node of the lab.
    pub async fn stop_nodes(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> LifecycleResult<()> {
        self.run(Operation::Stop, names, cancel).await
    }

    /// Start stopped nodes, restoring their parked interfaces.
    pub async fn start_nodes(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> LifecycleResult<()> {
        self.run(Operation::Start, names, cancel).await
    }

    /// Stop (when running) and then start each node.
    pub async fn restart_nodes(
        &self,
        names: &[String],
        cancel: &CancellationToken,
    ) -> LifecycleResult<()> {
        self.run(Operation::Restart, names, cancel).await
    }

    async fn run(
        &self,
        op: Operation,
        names: &[String],
        cancel: &CancellationToken,
    ) -> LifecycleResult<()> {
        let lab = &self.lab;
        if lab.nodes.is_empty() {
            return Err(LifecycleError::NoNodes(lab.name.clone()));
        }
        let _lock = LabLock::acquire(lock_path(&lab.paths, &lab.name, &lab.settings.tmp_dir)).await?;

        lab.resolve_links().await?;
        let providers = namespace_providers(&lab.nodes);

        let targets = if names.is_empty() {
            lab.sorted_names()
        } else {
            names.to_vec()
        };
        info!(lab = %lab.name, op = op.as_str(), nodes = targets.len(), "lifecycle operation started");

        for name in &targets {
            if cancel.is_cancelled() {
                return Err(LifecycleError::Cancelled);
            }
            let node = validate_node(&lab.nodes, name, &providers).await?;
            self.apply(op, node.as_ref()).await?;
        }
        Ok(())
    }

    async fn apply(&self, op: Operation, node: &dyn Node) -> LifecycleResult<()> {
        let name = node.short_name();
        let status = node.container_status().await;
        if status == ContainerStatus::NotFound {
            return Err(LifecycleError::ContainerNotFound {
                node: name.to_string(),
                container: node.config().long_name.clone(),
            });
        }

        let ns = self.ns.as_ref();
        match (op, status) {
            (Operation::Stop, ContainerStatus::Running) => stop_node(node, ns).await,
            (Operation::Start, ContainerStatus::Stopped) => start_node(node, ns).await,
            (Operation::Restart, ContainerStatus::Running) => {
                stop_node(node, ns).await?;
                start_node(node, ns).await
            }
            (Operation::Restart, _) => start_node(node, ns).await,
            (op, status) => {
                debug!(node = %name, op = op.as_str(), status = %status, "nothing to do, skipping");
                Ok(())
            }
        }
    }
}
