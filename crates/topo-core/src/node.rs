//! Node and runtime capability traits.
//!
//! The orchestrator never depends on a concrete node kind or runtime
//! backend; it only drives these traits. Methods that reach into a runtime
//! return `anyhow::Result` so implementations can surface whatever their
//! backend reports.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::exec::{ExecCmd, ExecCollection, ExecResult};
use crate::types::{ContainerStatus, Endpoint, GenericContainer, NodeConfig};

/// Nodes of a lab keyed by short name.
pub type NodeMap = BTreeMap<String, Arc<dyn Node>>;

/// When a runtime pulls an image before creating a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    Always,
    Never,
    #[default]
    IfNotPresent,
}

/// Shared inputs for the pre-deploy, deploy, and post-deploy hooks.
#[derive(Clone)]
pub struct DeployParams {
    pub lab_name: String,
    pub lab_dir: PathBuf,
    pub nodes: NodeMap,
}

/// A container or micro-VM backend.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// False for backends that cannot provision two nodes at once; the
    /// dependency graph chains such nodes into a serial order.
    fn concurrent_provisioning(&self) -> bool {
        true
    }

    async fn container_status(&self, container: &str) -> ContainerStatus;

    async fn start_container(&self, container: &str) -> anyhow::Result<()>;

    async fn stop_container(&self, container: &str) -> anyhow::Result<()>;

    async fn delete_container(&self, container: &str) -> anyhow::Result<()>;

    async fn pull_image(&self, image: &str, policy: PullPolicy) -> anyhow::Result<()>;

    async fn create_network(&self) -> anyhow::Result<()>;

    async fn delete_network(&self) -> anyhow::Result<()>;
}

/// One emulated device in the topology.
#[async_trait]
pub trait Node: Send + Sync {
    fn config(&self) -> &NodeConfig;

    fn short_name(&self) -> &str {
        &self.config().short_name
    }

    fn runtime(&self) -> Arc<dyn ContainerRuntime>;

    async fn pre_deploy(&self, params: &DeployParams) -> anyhow::Result<()>;

    async fn deploy(&self, params: &DeployParams) -> anyhow::Result<()>;

    /// Create this node's side of its dataplane links.
    async fn deploy_endpoints(&self) -> anyhow::Result<()>;

    /// Refresh runtime-assigned facts (e.g. management addresses).
    async fn update_config_with_runtime_info(&self) -> anyhow::Result<()>;

    async fn post_deploy(&self, params: &DeployParams) -> anyhow::Result<()>;

    async fn run_exec(&self, cmd: &ExecCmd) -> anyhow::Result<ExecResult>;

    /// Run the node's configured `exec` commands, recording results under
    /// the node's short name.
    async fn run_exec_from_config(&self, log: &ExecCollection) -> anyhow::Result<()> {
        for command in &self.config().exec {
            let cmd = ExecCmd::parse(command)?;
            match self.run_exec(&cmd).await {
                Ok(result) => log.add(self.short_name(), result),
                Err(e) => {
                    error!(node = %self.short_name(), cmd = %command, error = %e, "exec failed")
                }
            }
        }
        Ok(())
    }

    async fn is_healthy(&self) -> anyhow::Result<bool>;

    async fn container_status(&self) -> ContainerStatus {
        self.runtime()
            .container_status(&self.config().long_name)
            .await
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.runtime()
            .start_container(&self.config().long_name)
            .await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.runtime()
            .stop_container(&self.config().long_name)
            .await
    }

    fn endpoints(&self) -> Vec<Endpoint>;

    /// Path of the node's current network namespace.
    async fn ns_path(&self) -> anyhow::Result<PathBuf>;

    async fn containers(&self) -> anyhow::Result<Vec<GenericContainer>>;

    async fn delete(&self) -> anyhow::Result<()>;
}
