//! Per-node deployment outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{error, info};

use topo_core::Stage;

/// Pipeline step at which a node stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "step", content = "stage")]
pub enum Step {
    PreDeploy,
    Deploy,
    DeployEndpoints,
    /// A dependee abandoned the stage this node was waiting to enter.
    Dependency(Stage),
    Cancelled,
}

impl Step {
    /// Stage the step belongs to.
    pub fn stage(self) -> Option<Stage> {
        match self {
            Step::PreDeploy | Step::Deploy => Some(Stage::Create),
            Step::DeployEndpoints => Some(Stage::CreateLinks),
            Step::Dependency(stage) => Some(stage),
            Step::Cancelled => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::PreDeploy => f.write_str("pre-deploy"),
            Step::Deploy => f.write_str("deploy"),
            Step::DeployEndpoints => f.write_str("deploy-endpoints"),
            Step::Dependency(stage) => write!(f, "dependencies of {stage}"),
            Step::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Halt {
    pub step: Step,
    pub reason: String,
}

/// What happened to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeOutcome {
    /// Stages whose dependers were released, in order.
    pub completed: Vec<Stage>,
    /// Stages given up without halting the node (e.g. a failing health
    /// poll before the exit wait).
    pub abandoned: Vec<Stage>,
    pub halted: Option<Halt>,
    #[serde(skip)]
    pub(crate) finished: bool,
}

impl NodeOutcome {
    pub fn is_failed(&self) -> bool {
        self.halted.is_some() || !self.abandoned.is_empty()
    }

    pub fn completed(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }
}

/// Success and failure counts for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Outcome of every node of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub nodes: BTreeMap<String, NodeOutcome>,
}

impl DeployReport {
    pub fn node(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes.get(name)
    }

    /// Names of nodes that halted or abandoned a stage.
    pub fn failed(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// Per-stage counts. A node counts as failed for the stage it halted
    /// in and for every stage it abandoned.
    pub fn stage_summary(&self) -> BTreeMap<Stage, StageSummary> {
        let mut summary: BTreeMap<Stage, StageSummary> = BTreeMap::new();
        for outcome in self.nodes.values() {
            for stage in &outcome.completed {
                summary.entry(*stage).or_default().completed += 1;
            }
            for stage in &outcome.abandoned {
                summary.entry(*stage).or_default().failed += 1;
            }
            if let Some(stage) = outcome.halted.as_ref().and_then(|h| h.step.stage()) {
                summary.entry(stage).or_default().failed += 1;
            }
        }
        summary
    }

    /// Emit the summary and every halted node through `tracing`.
    pub fn log(&self) {
        for (stage, counts) in self.stage_summary() {
            info!(%stage, completed = counts.completed, failed = counts.failed, "stage summary");
        }
        for (name, outcome) in &self.nodes {
            if let Some(halt) = &outcome.halted {
                error!(node = %name, step = %halt.step, reason = %halt.reason, "node deployment halted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> DeployReport {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "a".to_string(),
            NodeOutcome {
                completed: vec![Stage::Create, Stage::CreateLinks, Stage::Configure],
                ..Default::default()
            },
        );
        nodes.insert(
            "b".to_string(),
            NodeOutcome {
                completed: vec![Stage::Create],
                halted: Some(Halt {
                    step: Step::DeployEndpoints,
                    reason: "veth create failed".into(),
                }),
                ..Default::default()
            },
        );
        nodes.insert(
            "c".to_string(),
            NodeOutcome {
                completed: vec![Stage::Create, Stage::CreateLinks, Stage::Configure],
                abandoned: vec![Stage::Healthy],
                ..Default::default()
            },
        );
        DeployReport { nodes }
    }

    #[test]
    fn failed_lists_halted_and_abandoned_nodes() {
        let r = report();
        assert_eq!(r.failed(), vec!["b", "c"]);
        assert!(!r.is_success());
        assert!(r.node("a").unwrap().completed(Stage::Configure));
    }

    #[test]
    fn stage_summary_counts() {
        let summary = report().stage_summary();
        assert_eq!(summary[&Stage::Create], StageSummary { completed: 3, failed: 0 });
        assert_eq!(summary[&Stage::CreateLinks], StageSummary { completed: 2, failed: 1 });
        assert_eq!(summary[&Stage::Healthy], StageSummary { completed: 0, failed: 1 });
        assert!(!summary.contains_key(&Stage::Exit));
    }

    #[test]
    fn step_display_and_stage() {
        assert_eq!(Step::Dependency(Stage::Configure).to_string(), "dependencies of configure");
        assert_eq!(Step::Deploy.stage(), Some(Stage::Create));
        assert_eq!(Step::Cancelled.stage(), None);
    }

    #[test]
    fn report_serializes() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["nodes"]["b"]["halted"]["step"]["step"], "deploy-endpoints");
        assert_eq!(json["nodes"]["a"]["completed"][1], "create-links");
    }
}
