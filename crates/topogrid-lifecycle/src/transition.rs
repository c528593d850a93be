//! Stop and start transitions for a single node.
//!
//! Each transition tracks how far it got in an explicit phase. On failure,
//! the phase decides which undo steps run, newest first, so a node always
//! ends up either running with its interfaces in place or stopped with
//! every interface parked.
//!
//! ```text
//! stop:  Parking ─► Parked ─► AliasRepointed ─► container stopped
//!           │         │            │
//!           │         └────────────┴─► undo_alias + undo_park
//!           └──────────────────────────► undo_park
//!
//! start: Started ─► Restoring ─► Restored ─► interfaces up, alias linked
//!           │           │            │
//!           └───────────┴────────────┴─► undo_restore + undo_start
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use topo_core::{ContainerStatus, Endpoint, Node};
use topogrid_netns::{NamespaceOps, parking_netns_name};

use crate::error::{LifecycleError, LifecycleResult};
use crate::prestop::pre_stop_cleanup;
use crate::validate::veth_endpoints;

/// How far a stop got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    /// Moving interfaces into the parking namespace.
    Parking,
    /// Every interface is parked. The alias may already be gone, since
    /// re-pointing it removes the old link first.
    Parked,
    /// The container namespace alias points at the parking namespace.
    AliasRepointed,
}

/// How far a start got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    /// The container is running again.
    Started,
    /// Moving interfaces back into the container namespace.
    Restoring,
    /// Every interface is back in the container namespace.
    Restored,
}

struct StopTransition<'a> {
    node: &'a dyn Node,
    ns: &'a dyn NamespaceOps,
    park: PathBuf,
    node_ns: PathBuf,
    moved: Vec<Endpoint>,
    phase: StopPhase,
}

impl StopTransition<'_> {
    fn name(&self) -> &str {
        self.node.short_name()
    }

    /// Move parked interfaces back and bring them up.
    async fn undo_park(&self) -> Result<(), String> {
        if self.moved.is_empty() {
            return Ok(());
        }
        self.ns
            .move_endpoints(&self.park, &self.node_ns, &self.moved, false)
            .await
            .into_result()
            .map_err(|e| format!("restoring interfaces: {e}"))?;
        self.ns
            .set_endpoints_up(&self.node_ns, &self.moved)
            .await
            .map_err(|e| format!("enabling interfaces: {e}"))
    }

    /// Point the container alias back at the node's own namespace.
    async fn undo_alias(&self) {
        let container = &self.node.config().long_name;
        if let Err(e) = self.ns.link_container_ns(container, &self.node_ns).await {
            warn!(node = %self.name(), error = %e, "failed restoring namespace alias");
        }
    }

    async fn roll_back(&self) -> Result<(), String> {
        warn!(node = %self.name(), phase = ?self.phase, moved = self.moved.len(), "rolling back stop");
        if self.phase != StopPhase::Parking {
            self.undo_alias().await;
        }
        self.undo_park().await
    }

    async fn fail(&self, step: &'static str, reason: impl ToString) -> LifecycleError {
        let reason = reason.to_string();
        match self.roll_back().await {
            Ok(()) => LifecycleError::step(self.name(), step, reason),
            Err(rollback) => LifecycleError::RollbackFailed {
                node: self.name().to_string(),
                step,
                reason,
                rollback,
            },
        }
    }
}

/// Park a running node's interfaces and stop its container.
pub async fn stop_node(node: &dyn Node, ns: &dyn NamespaceOps) -> LifecycleResult<()> {
    let name = node.short_name();
    let container = node.config().long_name.as_str();
    let endpoints = veth_endpoints(node)?;

    let park = ns
        .ensure_named(&parking_netns_name(container))
        .await
        .map_err(|e| LifecycleError::step(name, "creating parking namespace", e))?;
    let node_ns = node
        .ns_path()
        .await
        .map_err(|e| LifecycleError::step(name, "getting namespace path", e))?;

    let mut tx = StopTransition {
        node,
        ns,
        park,
        node_ns,
        moved: Vec::new(),
        phase: StopPhase::Parking,
    };

    let outcome = ns
        .move_endpoints(&tx.node_ns, &tx.park, &endpoints, true)
        .await;
    tx.moved = outcome.moved;
    if let Some(e) = outcome.error {
        return Err(tx.fail("parking interfaces", e).await);
    }
    tx.phase = StopPhase::Parked;
    debug!(node = %name, parked = tx.moved.len(), "interfaces parked");

    if let Err(e) = ns.link_container_ns(container, &tx.park).await {
        return Err(tx.fail("linking parking namespace", e).await);
    }
    tx.phase = StopPhase::AliasRepointed;

    pre_stop_cleanup(node).await;

    if let Err(e) = node.stop().await {
        if node.container_status().await == ContainerStatus::Stopped {
            warn!(node = %name, error = %e, "stop reported an error but the container is stopped");
        } else {
            return Err(tx.fail("stopping container", e).await);
        }
    }

    info!(node = %name, interfaces = tx.moved.len(), "node stopped");
    Ok(())
}

struct StartTransition<'a> {
    node: &'a dyn Node,
    ns: &'a dyn NamespaceOps,
    park: PathBuf,
    moved: Vec<Endpoint>,
    phase: StartPhase,
}

impl StartTransition<'_> {
    fn name(&self) -> &str {
        self.node.short_name()
    }

    /// Move restored interfaces back into parking, down.
    async fn undo_restore(&self, node_ns: &Path) -> Result<(), String> {
        if self.moved.is_empty() {
            return Ok(());
        }
        self.ns
            .move_endpoints(node_ns, &self.park, &self.moved, true)
            .await
            .into_result()
            .map(|_| ())
            .map_err(|e| format!("re-parking interfaces: {e}"))
    }

    /// Re-point the alias at parking and stop the container again.
    async fn undo_start(&self) -> Result<(), String> {
        let container = &self.node.config().long_name;
        let mut problems = Vec::new();
        if let Err(e) = self.ns.link_container_ns(container, &self.park).await {
            problems.push(format!("linking parking namespace: {e}"));
        }
        if let Err(e) = self.node.stop().await {
            if self.node.container_status().await != ContainerStatus::Stopped {
                problems.push(format!("stopping container: {e}"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    async fn roll_back(&self, node_ns: Option<&Path>) -> Result<(), String> {
        warn!(node = %self.name(), phase = ?self.phase, moved = self.moved.len(), "rolling back start");
        let mut problems = Vec::new();
        if let Some(node_ns) = node_ns {
            if matches!(self.phase, StartPhase::Restoring | StartPhase::Restored) {
                if let Err(e) = self.undo_restore(node_ns).await {
                    problems.push(e);
                }
            }
        }
        if let Err(e) = self.undo_start().await {
            problems.push(e);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    async fn fail(
        &self,
        node_ns: Option<&Path>,
        step: &'static str,
        reason: impl ToString,
    ) -> LifecycleError {
        let reason = reason.to_string();
        match self.roll_back(node_ns).await {
            Ok(()) => LifecycleError::step(self.name(), step, reason),
            Err(rollback) => LifecycleError::RollbackFailed {
                node: self.name().to_string(),
                step,
                reason,
                rollback,
            },
        }
    }
}

/// Start a parked node's container and hand its interfaces back.
pub async fn start_node(node: &dyn Node, ns: &dyn NamespaceOps) -> LifecycleResult<()> {
    let name = node.short_name();
    let container = node.config().long_name.as_str();
    let endpoints = veth_endpoints(node)?;

    let park_name = parking_netns_name(container);
    let park = ns.named_path(&park_name);
    if !ns.exists(&park).await {
        return Err(LifecycleError::MissingParkingNamespace {
            node: name.to_string(),
            namespace: park_name,
        });
    }

    node.start()
        .await
        .map_err(|e| LifecycleError::step(name, "starting container", e))?;

    let mut tx = StartTransition {
        node,
        ns,
        park,
        moved: Vec::new(),
        phase: StartPhase::Started,
    };

    let node_ns = match node.ns_path().await {
        Ok(path) => path,
        Err(e) => return Err(tx.fail(None, "getting namespace path", e).await),
    };

    tx.phase = StartPhase::Restoring;
    let outcome = ns
        .move_endpoints(&tx.park, &node_ns, &endpoints, false)
        .await;
    tx.moved = outcome.moved;
    if let Some(e) = outcome.error {
        return Err(tx.fail(Some(&node_ns), "restoring interfaces", e).await);
    }
    tx.phase = StartPhase::Restored;

    if let Err(e) = ns.set_endpoints_up(&node_ns, &tx.moved).await {
        return Err(tx.fail(Some(&node_ns), "enabling interfaces", e).await);
    }
    if let Err(e) = ns.link_container_ns(container, &node_ns).await {
        return Err(tx.fail(Some(&node_ns), "linking container namespace", e).await);
    }

    info!(node = %name, interfaces = tx.moved.len(), "node started");
    Ok(())
}
