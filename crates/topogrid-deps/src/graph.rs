//! The dependency graph of one deployment.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use topo_core::{Node, Stage};

use crate::cycle::peel;
use crate::error::{DependencyError, DependencyResult};
use crate::node::DependencyNode;

/// Graph nodes keyed by short name.
///
/// Built completely before scheduling starts. After that the only mutation
/// is gate signalling, which goes through the gates themselves.
#[derive(Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Arc<dyn Node>) -> DependencyResult<()> {
        let name = node.short_name().to_string();
        if self.nodes.contains_key(&name) {
            return Err(DependencyError::DuplicateNode(name));
        }
        self.nodes.insert(name, DependencyNode::new(node));
        Ok(())
    }

    /// Record that `depender` may not enter `depender_stage` before
    /// `dependee` finished `dependee_stage`.
    pub fn add_depender(
        &mut self,
        dependee: &str,
        dependee_stage: Stage,
        depender: &str,
        depender_stage: Stage,
    ) -> DependencyResult<()> {
        let gate = self
            .nodes
            .get(depender)
            .ok_or_else(|| DependencyError::UnknownNode(depender.to_string()))?
            .gate(depender_stage)
            .clone();
        let dependee_node =
            self.nodes
                .get_mut(dependee)
                .ok_or_else(|| DependencyError::DependeeNotFound {
                    dependee: dependee.to_string(),
                    depender: depender.to_string(),
                })?;

        gate.add_dependency();
        dependee_node.push_depender(dependee_stage, depender, depender_stage, gate);
        debug!(%dependee, %dependee_stage, %depender, %depender_stage, "added dependency");
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `dependee -> [dependers]` by node name, over the edges of every
    /// stage. Every node appears as a key; depender lists are sorted and
    /// unique.
    pub fn dependency_map(&self) -> BTreeMap<String, Vec<String>> {
        self.nodes
            .iter()
            .map(|(name, node)| {
                let mut dependers: Vec<String> = Stage::ALL
                    .into_iter()
                    .flat_map(|stage| node.dependers(stage))
                    .map(|d| d.node.clone())
                    .collect();
                dependers.sort();
                dependers.dedup();
                (name.clone(), dependers)
            })
            .collect()
    }

    /// Adjacency over `node.stage` vertices. Besides the registered edges,
    /// every stage gates the next stage of the same node, since a node's
    /// pipeline runs its stages in order.
    pub fn stage_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        for (name, node) in &self.nodes {
            for (i, stage) in Stage::ALL.into_iter().enumerate() {
                let mut dependers: Vec<String> = node
                    .dependers(stage)
                    .iter()
                    .map(|d| vertex(&d.node, d.stage))
                    .collect();
                if let Some(next) = Stage::ALL.get(i + 1) {
                    dependers.push(vertex(name, *next));
                }
                dependers.sort();
                dependers.dedup();
                map.insert(vertex(name, stage), dependers);
            }
        }
        map
    }

    /// Human-readable listing of the node adjacency.
    pub fn render(&self) -> String {
        render_map(&self.dependency_map())
    }

    /// Fail when no execution order satisfies every edge together with the
    /// per-node stage order. The error lists, by node name, the edges that
    /// could not be peeled.
    pub fn check_acyclicity(&self) -> DependencyResult<()> {
        let staged = self.stage_map();
        debug!(dependencies = %render_map(&staged), "checking dependency graph");
        let outcome = peel(&staged);
        if outcome.is_acyclic() {
            debug!(rounds = outcome.rounds, vertices = outcome.removed.len(), "dependency graph is acyclic");
            return Ok(());
        }
        Err(DependencyError::Cyclic(render_map(
            &self.stuck_nodes(&outcome.remaining),
        )))
    }

    /// Project the unpeeled `node.stage` vertices back onto node names.
    fn stuck_nodes(
        &self,
        remaining: &BTreeMap<String, Vec<String>>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut stuck: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, node) in &self.nodes {
            for stage in Stage::ALL {
                if !remaining.contains_key(&vertex(name, stage)) {
                    continue;
                }
                let dependers = stuck.entry(name.clone()).or_default();
                for d in node.dependers(stage) {
                    if remaining.contains_key(&vertex(&d.node, d.stage)) {
                        dependers.push(d.node.clone());
                    }
                }
            }
        }
        for dependers in stuck.values_mut() {
            dependers.sort();
            dependers.dedup();
        }
        stuck
    }
}

fn vertex(node: &str, stage: Stage) -> String {
    format!("{node}.{stage}")
}

/// One `dependee -> [ a, b ]` line per key.
pub fn render_map(map: &BTreeMap<String, Vec<String>>) -> String {
    let mut out = String::new();
    for (dependee, dependers) in map {
        let _ = writeln!(out, "{dependee} -> [ {} ]", dependers.join(", "));
    }
    out
}
