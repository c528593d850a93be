//! In-memory view of one lab.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::LabSettings;
use crate::error::{CoreError, CoreResult};
use crate::node::{ContainerRuntime, DeployParams, Node, NodeMap};

/// Attaches dataplane endpoints to nodes once the topology's links are known.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, nodes: &NodeMap) -> anyhow::Result<()>;
}

/// Filesystem locations belonging to a lab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabPaths {
    /// Working directory of the lab. May not exist before the first deploy.
    pub lab_dir: PathBuf,
    /// Topology file the lab was loaded from, if any.
    pub topology_file: Option<PathBuf>,
}

impl LabPaths {
    pub fn new(lab_dir: impl Into<PathBuf>) -> Self {
        Self {
            lab_dir: lab_dir.into(),
            topology_file: None,
        }
    }

    /// Lab directory next to the topology file: `<topo dir>/clab-<name>`.
    pub fn from_topology(topology_file: &Path, lab_name: &str) -> Self {
        let base = topology_file.parent().unwrap_or_else(|| Path::new("."));
        Self {
            lab_dir: base.join(format!("clab-{lab_name}")),
            topology_file: Some(topology_file.to_path_buf()),
        }
    }
}

/// Nodes, paths, and settings of a lab, plus the runtime used for
/// lab-wide queries such as out-of-topology container status.
pub struct Lab {
    pub name: String,
    pub paths: LabPaths,
    pub settings: LabSettings,
    pub nodes: NodeMap,
    pub runtime: Arc<dyn ContainerRuntime>,
    link_resolver: Option<Arc<dyn LinkResolver>>,
}

impl Lab {
    pub fn new(name: impl Into<String>, paths: LabPaths, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: name.into(),
            paths,
            settings: LabSettings::default(),
            nodes: NodeMap::new(),
            runtime,
            link_resolver: None,
        }
    }

    pub fn with_settings(mut self, settings: LabSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_link_resolver(mut self, resolver: Arc<dyn LinkResolver>) -> Self {
        self.link_resolver = Some(resolver);
        self
    }

    pub fn add_node(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.short_name().to_string(), node);
    }

    pub fn node(&self, name: &str) -> CoreResult<&Arc<dyn Node>> {
        self.nodes
            .get(name)
            .ok_or_else(|| CoreError::NodeNotFound(name.to_string()))
    }

    /// Node short names in deterministic order.
    pub fn sorted_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Run link resolution so every node knows its endpoints.
    pub async fn resolve_links(&self) -> CoreResult<()> {
        let Some(resolver) = &self.link_resolver else {
            debug!(lab = %self.name, "no link resolver configured");
            return Ok(());
        };
        resolver
            .resolve(&self.nodes)
            .await
            .map_err(|e| CoreError::LinkResolution(e.to_string()))
    }

    pub fn deploy_params(&self) -> DeployParams {
        DeployParams {
            lab_name: self.name.clone(),
            lab_dir: self.paths.lab_dir.clone(),
            nodes: self.nodes.clone(),
        }
    }
}
