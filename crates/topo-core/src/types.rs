//! Deployment stages, node definitions, and link endpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Ordered deployment phases a node passes through.
///
/// `Healthy` and `Exit` are only entered when somebody waits on them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Create,
    CreateLinks,
    Configure,
    Healthy,
    Exit,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Create,
        Stage::CreateLinks,
        Stage::Configure,
        Stage::Healthy,
        Stage::Exit,
    ];

    /// Position of the stage in [`Stage::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Create => "create",
            Stage::CreateLinks => "create-links",
            Stage::Configure => "configure",
            Stage::Healthy => "healthy",
            Stage::Exit => "exit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStage(s.to_string()))
    }
}

fn default_stage() -> Stage {
    Stage::Create
}

/// A `wait-for` entry: the owning stage may not start before `node`
/// finished `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitFor {
    pub node: String,
    #[serde(default = "default_stage", alias = "state")]
    pub stage: Stage,
}

impl WaitFor {
    pub fn new(node: impl Into<String>, stage: Stage) -> Self {
        Self {
            node: node.into(),
            stage,
        }
    }
}

/// When an exec hook runs relative to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecPhase {
    #[default]
    OnEnter,
    OnExit,
}

/// Where an exec hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecTarget {
    #[default]
    Container,
    Host,
}

/// A command attached to a stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageExec {
    pub command: String,
    #[serde(default)]
    pub target: ExecTarget,
    #[serde(default)]
    pub phase: ExecPhase,
}

/// Per-stage configuration: dependencies and exec hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageConfig {
    #[serde(default)]
    pub wait_for: Vec<WaitFor>,
    #[serde(default)]
    pub exec: Vec<StageExec>,
}

impl StageConfig {
    /// Append `other`'s entries. Duplicate `wait-for` entries are dropped so
    /// layered defaults never register the same edge twice.
    pub fn merge(&mut self, other: &StageConfig) {
        for wf in &other.wait_for {
            if !self.wait_for.contains(wf) {
                self.wait_for.push(wf.clone());
            }
        }
        self.exec.extend(other.exec.iter().cloned());
    }
}

/// Stage configuration for all five stages of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Stages {
    #[serde(default)]
    pub create: StageConfig,
    #[serde(default)]
    pub create_links: StageConfig,
    #[serde(default)]
    pub configure: StageConfig,
    #[serde(default)]
    pub healthy: StageConfig,
    #[serde(default)]
    pub exit: StageConfig,
}

impl Stages {
    pub fn get(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Create => &self.create,
            Stage::CreateLinks => &self.create_links,
            Stage::Configure => &self.configure,
            Stage::Healthy => &self.healthy,
            Stage::Exit => &self.exit,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageConfig {
        match stage {
            Stage::Create => &mut self.create,
            Stage::CreateLinks => &mut self.create_links,
            Stage::Configure => &mut self.configure,
            Stage::Healthy => &mut self.healthy,
            Stage::Exit => &mut self.exit,
        }
    }

    /// Every `(depender stage, wait-for)` pair declared on this node.
    pub fn wait_for(&self) -> impl Iterator<Item = (Stage, &WaitFor)> {
        Stage::ALL
            .into_iter()
            .flat_map(move |stage| self.get(stage).wait_for.iter().map(move |wf| (stage, wf)))
    }

    /// Exec hooks of `stage` that run in `phase`.
    pub fn execs(&self, stage: Stage, phase: ExecPhase) -> impl Iterator<Item = &StageExec> {
        self.get(stage).exec.iter().filter(move |x| x.phase == phase)
    }

    pub fn has_execs(&self, stage: Stage) -> bool {
        !self.get(stage).exec.is_empty()
    }

    pub fn merge(&mut self, other: &Stages) {
        for stage in Stage::ALL {
            self.get_mut(stage).merge(other.get(stage));
        }
    }
}

/// Static definition of one emulated device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name as written in the topology.
    pub short_name: String,
    /// Lab-qualified container name.
    pub long_name: String,
    pub kind: String,
    pub image: String,
    /// Name of the runtime backend that provisions this node.
    pub runtime: String,
    pub mgmt_ipv4: Option<String>,
    pub mgmt_ipv6: Option<String>,
    /// Container network mode, e.g. `container:other-node`.
    pub network_mode: Option<String>,
    /// Seconds to wait before provisioning.
    pub startup_delay: u64,
    pub auto_remove: bool,
    /// Nodes living directly in the host namespace (e.g. the synthetic
    /// `host` node).
    pub root_namespace_based: bool,
    pub stages: Stages,
    /// Commands run once the node is configured.
    pub exec: Vec<String>,
}

impl NodeConfig {
    pub fn has_static_mgmt_ip(&self) -> bool {
        self.mgmt_ipv4.as_deref().is_some_and(|ip| !ip.is_empty())
            || self.mgmt_ipv6.as_deref().is_some_and(|ip| !ip.is_empty())
    }

    /// The container whose network namespace this node joins, if any.
    pub fn shared_namespace_ref(&self) -> Option<&str> {
        let mode = self.network_mode.as_deref()?;
        let (kind, target) = mode.split_once(':')?;
        (kind == "container" && !target.is_empty()).then_some(target)
    }
}

/// Observed state of a node's backing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerStatus {
    Running,
    Stopped,
    NotFound,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::NotFound => "not-found",
        })
    }
}

/// Kind of dataplane link an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    Veth,
    Bridge,
    Host,
    MgmtNet,
    Macvlan,
    Vxlan,
    Dummy,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkType::Veth => "veth",
            LinkType::Bridge => "bridge",
            LinkType::Host => "host",
            LinkType::MgmtNet => "mgmt-net",
            LinkType::Macvlan => "macvlan",
            LinkType::Vxlan => "vxlan",
            LinkType::Dummy => "dummy",
        })
    }
}

/// One side of a dataplane link, as seen from the node that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub iface_name: String,
    pub iface_alias: Option<String>,
    pub link_type: LinkType,
}

impl Endpoint {
    pub fn veth(node: impl Into<String>, iface_name: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            iface_name: iface_name.into(),
            iface_alias: None,
            link_type: LinkType::Veth,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.iface_name)
    }
}

/// Runtime-agnostic view of a container backing a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericContainer {
    pub id: String,
    pub names: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub status: ContainerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_matches_pipeline() {
        let indices: Vec<usize> = Stage::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(Stage::Create < Stage::Exit);
    }

    #[test]
    fn stage_parses_from_kebab_case() {
        assert_eq!("create-links".parse::<Stage>().unwrap(), Stage::CreateLinks);
        assert_eq!("healthy".parse::<Stage>().unwrap(), Stage::Healthy);
        assert!(matches!(
            "booted".parse::<Stage>(),
            Err(CoreError::UnknownStage(_))
        ));
    }

    #[test]
    fn wait_for_defaults_to_create_stage() {
        let wf: WaitFor = serde_json::from_str(r#"{"node":"srl1"}"#).unwrap();
        assert_eq!(wf, WaitFor::new("srl1", Stage::Create));

        let wf: WaitFor = serde_json::from_str(r#"{"node":"srl1","state":"healthy"}"#).unwrap();
        assert_eq!(wf.stage, Stage::Healthy);
    }

    #[test]
    fn stage_merge_deduplicates_wait_for() {
        let mut base = Stages::default();
        base.configure.wait_for.push(WaitFor::new("a", Stage::Create));

        let mut other = Stages::default();
        other.configure.wait_for.push(WaitFor::new("a", Stage::Create));
        other.configure.wait_for.push(WaitFor::new("b", Stage::Healthy));
        other.exit.exec.push(StageExec {
            command: "echo bye".into(),
            target: ExecTarget::Host,
            phase: ExecPhase::OnExit,
        });

        base.merge(&other);
        assert_eq!(base.configure.wait_for.len(), 2);
        assert!(base.has_execs(Stage::Exit));
        assert_eq!(base.execs(Stage::Exit, ExecPhase::OnExit).count(), 1);
        assert_eq!(base.execs(Stage::Exit, ExecPhase::OnEnter).count(), 0);
    }

    #[test]
    fn wait_for_iterates_all_stages() {
        let mut stages = Stages::default();
        stages.create.wait_for.push(WaitFor::new("a", Stage::Create));
        stages.healthy.wait_for.push(WaitFor::new("b", Stage::Exit));

        let pairs: Vec<(Stage, &str)> = stages
            .wait_for()
            .map(|(s, wf)| (s, wf.node.as_str()))
            .collect();
        assert_eq!(pairs, vec![(Stage::Create, "a"), (Stage::Healthy, "b")]);
    }

    #[test]
    fn namespace_reference_parsing() {
        let mut cfg = NodeConfig {
            network_mode: Some("container:node2".into()),
            ..Default::default()
        };
        assert_eq!(cfg.shared_namespace_ref(), Some("node2"));

        cfg.network_mode = Some("host".into());
        assert_eq!(cfg.shared_namespace_ref(), None);

        cfg.network_mode = Some("container:".into());
        assert_eq!(cfg.shared_namespace_ref(), None);
    }

    #[test]
    fn static_mgmt_ip_detection() {
        let mut cfg = NodeConfig::default();
        assert!(!cfg.has_static_mgmt_ip());
        cfg.mgmt_ipv6 = Some("2001:db8::2".into());
        assert!(cfg.has_static_mgmt_ip());
        cfg.mgmt_ipv6 = Some(String::new());
        assert!(!cfg.has_static_mgmt_ip());
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::veth("r1", "eth1").to_string(), "r1:eth1");
    }
}
