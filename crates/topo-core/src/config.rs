//! Lab settings and topology file parsing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{NodeConfig, Stages};

/// Tunables for deployment and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LabSettings {
    /// Upper bound on concurrent node workers. `None` means one per node.
    pub max_workers: Option<usize>,
    pub skip_post_deploy: bool,
    #[serde(with = "duration_str")]
    pub health_poll_interval: Duration,
    #[serde(with = "duration_str")]
    pub exit_poll_interval: Duration,
    /// How long a node waits for an out-of-topology namespace provider.
    #[serde(with = "duration_str")]
    pub external_wait_timeout: Duration,
    /// Directory holding named network namespaces.
    pub netns_dir: PathBuf,
    /// Scratch directory for fallback lock files.
    pub tmp_dir: PathBuf,
}

impl Default for LabSettings {
    fn default() -> Self {
        Self {
            max_workers: None,
            skip_post_deploy: false,
            health_poll_interval: Duration::from_secs(1),
            exit_poll_interval: Duration::from_secs(1),
            external_wait_timeout: Duration::from_secs(15 * 60),
            netns_dir: PathBuf::from("/run/netns"),
            tmp_dir: PathBuf::from("/tmp/.topogrid"),
        }
    }
}

impl LabSettings {
    /// Worker count for a lab of `node_count` nodes.
    pub fn workers_for(&self, node_count: usize) -> usize {
        self.max_workers.unwrap_or(node_count).min(node_count).max(1)
    }
}

/// Parse `"500ms"`, `"1s"`, `"15m"`, or `"2h"`.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::InvalidDuration(s.to_string());

    let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (value, unit) = s.split_at(split);
    let value: u64 = value.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(invalid()),
    }
}

fn format_duration(d: &Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        format!("{millis}ms")
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Settings applied to every node before its own definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeDefaults {
    pub kind: Option<String>,
    pub image: Option<String>,
    pub runtime: Option<String>,
    #[serde(default)]
    pub stages: Stages,
}

/// One node as written in a topology file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeDefinition {
    pub kind: Option<String>,
    pub image: Option<String>,
    pub runtime: Option<String>,
    pub mgmt_ipv4: Option<String>,
    pub mgmt_ipv6: Option<String>,
    pub network_mode: Option<String>,
    #[serde(default)]
    pub startup_delay: u64,
    #[serde(default)]
    pub auto_remove: bool,
    #[serde(default)]
    pub stages: Stages,
    #[serde(default)]
    pub exec: Vec<String>,
}

/// A parsed topology file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TopologyFile {
    pub name: String,
    #[serde(default)]
    pub settings: LabSettings,
    #[serde(default)]
    pub defaults: NodeDefaults,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeDefinition>,
}

impl TopologyFile {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CoreResult<Self> {
        let topo: TopologyFile = toml::from_str(content)?;
        if topo.name.is_empty() {
            return Err(CoreError::Topology("lab name must not be empty".into()));
        }
        Ok(topo)
    }

    /// Container name of a node: `clab-<lab>-<node>`.
    pub fn long_name(&self, short_name: &str) -> String {
        format!("clab-{}-{}", self.name, short_name)
    }

    /// Resolve every node definition against the defaults.
    pub fn node_configs(&self) -> BTreeMap<String, NodeConfig> {
        self.nodes
            .iter()
            .map(|(name, def)| {
                let mut stages = self.defaults.stages.clone();
                stages.merge(&def.stages);
                let cfg = NodeConfig {
                    short_name: name.clone(),
                    long_name: self.long_name(name),
                    kind: def
                        .kind
                        .clone()
                        .or_else(|| self.defaults.kind.clone())
                        .unwrap_or_else(|| "linux".to_string()),
                    image: def
                        .image
                        .clone()
                        .or_else(|| self.defaults.image.clone())
                        .unwrap_or_default(),
                    runtime: def
                        .runtime
                        .clone()
                        .or_else(|| self.defaults.runtime.clone())
                        .unwrap_or_else(|| "docker".to_string()),
                    mgmt_ipv4: def.mgmt_ipv4.clone(),
                    mgmt_ipv6: def.mgmt_ipv6.clone(),
                    network_mode: def.network_mode.clone(),
                    startup_delay: def.startup_delay,
                    auto_remove: def.auto_remove,
                    root_namespace_based: false,
                    stages,
                    exec: def.exec.clone(),
                };
                (name.clone(), cfg)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecPhase, ExecTarget, Stage, WaitFor};

    const TOPO: &str = r#"
name = "dc1"

[settings]
max-workers = 2
health-poll-interval = "500ms"
external-wait-timeout = "2m"

[defaults]
kind = "nokia_srlinux"
runtime = "docker"

[defaults.stages.create-links]
exec = [{ command = "ip link", target = "host", phase = "on-exit" }]

[nodes.spine1]
mgmt-ipv4 = "172.20.20.10"

[nodes.leaf1]
startup-delay = 5
exec = ["sr_cli show version"]

[nodes.leaf1.stages.configure]
wait-for = [{ node = "spine1", stage = "healthy" }]

[nodes.probe]
kind = "linux"
network-mode = "container:leaf1"
"#;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn settings_defaults() {
        let s = LabSettings::default();
        assert_eq!(s.health_poll_interval, Duration::from_secs(1));
        assert_eq!(s.external_wait_timeout, Duration::from_secs(900));
        assert_eq!(s.netns_dir, PathBuf::from("/run/netns"));
        assert_eq!(s.workers_for(7), 7);
        assert_eq!(s.workers_for(0), 1);
    }

    #[test]
    fn workers_are_capped_by_node_count() {
        let s = LabSettings {
            max_workers: Some(16),
            ..Default::default()
        };
        assert_eq!(s.workers_for(3), 3);

        let s = LabSettings {
            max_workers: Some(0),
            ..Default::default()
        };
        assert_eq!(s.workers_for(3), 1);
    }

    #[test]
    fn topology_file_resolves_nodes() {
        let topo = TopologyFile::parse(TOPO).unwrap();
        assert_eq!(topo.settings.max_workers, Some(2));
        assert_eq!(topo.settings.health_poll_interval, Duration::from_millis(500));
        assert_eq!(topo.settings.external_wait_timeout, Duration::from_secs(120));
        assert_eq!(topo.settings.exit_poll_interval, Duration::from_secs(1));

        let nodes = topo.node_configs();
        assert_eq!(nodes.len(), 3);

        let spine = &nodes["spine1"];
        assert_eq!(spine.long_name, "clab-dc1-spine1");
        assert_eq!(spine.kind, "nokia_srlinux");
        assert!(spine.has_static_mgmt_ip());

        let leaf = &nodes["leaf1"];
        assert_eq!(leaf.startup_delay, 5);
        assert_eq!(
            leaf.stages.configure.wait_for,
            vec![WaitFor::new("spine1", Stage::Healthy)]
        );
        let hook = &leaf.stages.create_links.exec[0];
        assert_eq!(hook.target, ExecTarget::Host);
        assert_eq!(hook.phase, ExecPhase::OnExit);

        let probe = &nodes["probe"];
        assert_eq!(probe.kind, "linux");
        assert_eq!(probe.shared_namespace_ref(), Some("leaf1"));
    }

    #[test]
    fn topology_requires_name() {
        assert!(matches!(
            TopologyFile::parse("name = \"\""),
            Err(CoreError::Topology(_))
        ));
    }

    #[test]
    fn topology_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, TOPO).unwrap();
        let topo = TopologyFile::from_file(&path).unwrap();
        assert_eq!(topo.name, "dc1");
    }
}
