//! Nodes built straight from a topology file, for inspection without a
//! container runtime. Anything that would touch a container fails.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

use topo_core::{
    ContainerRuntime, ContainerStatus, DeployParams, Endpoint, ExecCmd, ExecResult,
    GenericContainer, Node, NodeConfig, NodeMap, PullPolicy, TopologyFile,
};

/// Runtimes that provision one node at a time.
const SERIAL_RUNTIMES: &[&str] = &["ignite"];

pub struct OfflineRuntime {
    name: String,
}

impl OfflineRuntime {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for OfflineRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn concurrent_provisioning(&self) -> bool {
        !SERIAL_RUNTIMES.contains(&self.name.as_str())
    }

    async fn container_status(&self, _container: &str) -> ContainerStatus {
        ContainerStatus::NotFound
    }

    async fn start_container(&self, container: &str) -> anyhow::Result<()> {
        bail!("cannot start {container}: offline runtime {}", self.name)
    }

    async fn stop_container(&self, container: &str) -> anyhow::Result<()> {
        bail!("cannot stop {container}: offline runtime {}", self.name)
    }

    async fn delete_container(&self, container: &str) -> anyhow::Result<()> {
        bail!("cannot delete {container}: offline runtime {}", self.name)
    }

    async fn pull_image(&self, image: &str, _policy: PullPolicy) -> anyhow::Result<()> {
        bail!("cannot pull {image}: offline runtime {}", self.name)
    }

    async fn create_network(&self) -> anyhow::Result<()> {
        bail!("offline runtime {} has no networks", self.name)
    }

    async fn delete_network(&self) -> anyhow::Result<()> {
        bail!("offline runtime {} has no networks", self.name)
    }
}

pub struct OfflineNode {
    cfg: NodeConfig,
    runtime: Arc<OfflineRuntime>,
}

impl OfflineNode {
    fn unavailable<T>(&self, what: &str) -> anyhow::Result<T> {
        bail!("node {}: {what} is unavailable offline", self.cfg.short_name)
    }
}

#[async_trait]
impl Node for OfflineNode {
    fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    async fn pre_deploy(&self, _params: &DeployParams) -> anyhow::Result<()> {
        self.unavailable("pre-deploy")
    }

    async fn deploy(&self, _params: &DeployParams) -> anyhow::Result<()> {
        self.unavailable("deploy")
    }

    async fn deploy_endpoints(&self) -> anyhow::Result<()> {
        self.unavailable("endpoint creation")
    }

    async fn update_config_with_runtime_info(&self) -> anyhow::Result<()> {
        self.unavailable("runtime info")
    }

    async fn post_deploy(&self, _params: &DeployParams) -> anyhow::Result<()> {
        self.unavailable("post-deploy")
    }

    async fn run_exec(&self, _cmd: &ExecCmd) -> anyhow::Result<ExecResult> {
        self.unavailable("exec")
    }

    async fn is_healthy(&self) -> anyhow::Result<bool> {
        self.unavailable("health check")
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    async fn ns_path(&self) -> anyhow::Result<PathBuf> {
        self.unavailable("namespace path")
    }

    async fn containers(&self) -> anyhow::Result<Vec<GenericContainer>> {
        Ok(Vec::new())
    }

    async fn delete(&self) -> anyhow::Result<()> {
        self.unavailable("delete")
    }
}

/// One offline node per topology node; nodes on the same runtime share it.
pub fn nodes_from_topology(topo: &TopologyFile) -> NodeMap {
    let mut runtimes: BTreeMap<String, Arc<OfflineRuntime>> = BTreeMap::new();
    topo.node_configs()
        .into_iter()
        .map(|(name, cfg)| {
            let runtime = runtimes
                .entry(cfg.runtime.clone())
                .or_insert_with(|| Arc::new(OfflineRuntime::new(&cfg.runtime)))
                .clone();
            let node: Arc<dyn Node> = Arc::new(OfflineNode { cfg, runtime });
            (name, node)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignite_is_serial() {
        assert!(!OfflineRuntime::new("ignite").concurrent_provisioning());
        assert!(OfflineRuntime::new("docker").concurrent_provisioning());
    }

    #[tokio::test]
    async fn runtime_calls_fail_offline() {
        let topo = TopologyFile::parse("name = \"t\"\n[nodes.r1]\n").unwrap();
        let nodes = nodes_from_topology(&topo);
        let r1 = &nodes["r1"];
        assert_eq!(r1.config().long_name, "clab-t-r1");
        assert_eq!(r1.runtime().name(), "docker");
        assert!(r1.start().await.is_err());
        assert_eq!(r1.container_status().await, ContainerStatus::NotFound);
    }
}
