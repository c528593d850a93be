//! Rules deriving dependency edges from node definitions.
//!
//! Applied in a fixed order by [`build`]: static-before-dynamic addressing,
//! user `wait-for`, runtime serialization, namespace sharing.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use topo_core::{NodeMap, Stage};

use crate::error::DependencyResult;
use crate::graph::DependencyGraph;

/// Register `nodes`, derive all edges, and verify that some execution
/// order satisfies them.
pub fn build(nodes: &NodeMap) -> DependencyResult<DependencyGraph> {
    let graph = derive(nodes)?;
    graph.check_acyclicity()?;
    Ok(graph)
}

/// Register `nodes` and apply every rule, without the acyclicity check.
pub fn derive(nodes: &NodeMap) -> DependencyResult<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for node in nodes.values() {
        graph.add_node(node.clone())?;
    }

    static_before_dynamic(&mut graph, nodes)?;
    wait_for(&mut graph, nodes)?;
    runtime_serialization(&mut graph, nodes)?;
    namespace_sharing(&mut graph, nodes)?;

    info!(nodes = graph.len(), "dependency graph built");
    Ok(graph)
}

/// Nodes without a management address wait for every node that has one,
/// so dynamic allocation never grabs a statically assigned address.
pub fn static_before_dynamic(graph: &mut DependencyGraph, nodes: &NodeMap) -> DependencyResult<()> {
    let (static_nodes, dynamic_nodes): (Vec<_>, Vec<_>) = nodes
        .iter()
        .partition(|(_, node)| node.config().has_static_mgmt_ip());

    for (dynamic, _) in &dynamic_nodes {
        for (fixed, _) in &static_nodes {
            graph.add_depender(fixed, Stage::Create, dynamic, Stage::Create)?;
        }
    }
    Ok(())
}

/// Edges declared by the user under each node's stages.
pub fn wait_for(graph: &mut DependencyGraph, nodes: &NodeMap) -> DependencyResult<()> {
    for (name, node) in nodes {
        for (stage, wf) in node.config().stages.wait_for() {
            graph.add_depender(&wf.node, wf.stage, name, stage)?;
        }
    }
    Ok(())
}

/// Chain nodes of runtimes that cannot provision concurrently into one
/// serial order, by sorted name.
pub fn runtime_serialization(graph: &mut DependencyGraph, nodes: &NodeMap) -> DependencyResult<()> {
    let mut serial: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (name, node) in nodes {
        let runtime = node.runtime();
        if !runtime.concurrent_provisioning() {
            serial
                .entry(runtime.name().to_string())
                .or_default()
                .push(name.as_str());
        }
    }

    for (runtime, chain) in serial {
        debug!(%runtime, nodes = chain.len(), "serializing node creation");
        for pair in chain.windows(2) {
            graph.add_depender(pair[0], Stage::Create, pair[1], Stage::Create)?;
        }
    }
    Ok(())
}

/// A node joining another container's network namespace waits for that
/// container to be created. Containers outside the topology are left to
/// the scheduler's external wait.
pub fn namespace_sharing(graph: &mut DependencyGraph, nodes: &NodeMap) -> DependencyResult<()> {
    for (name, node) in nodes {
        let Some(provider) = node.config().shared_namespace_ref() else {
            continue;
        };
        if !nodes.contains_key(provider) {
            warn!(
                node = %name,
                provider = %provider,
                "network namespace provider is not part of the topology, skipping dependency"
            );
            continue;
        }
        graph.add_depender(provider, Stage::Create, name, Stage::Create)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use topo_core::testing::{FakeNode, FakeRuntime};
    use topo_core::{Node, Stages, WaitFor};

    use super::*;
    use crate::error::DependencyError;

    fn nodes(list: Vec<FakeNode>) -> NodeMap {
        list.into_iter()
            .map(|n| (n.config().short_name.clone(), Arc::new(n) as Arc<dyn Node>))
            .collect()
    }

    fn docker() -> Arc<FakeRuntime> {
        Arc::new(FakeRuntime::new("docker"))
    }

    #[test]
    fn dynamic_nodes_wait_for_static_ones() {
        let rt = docker();
        let map = nodes(vec![
            FakeNode::new("a", "t", rt.clone()).with_mgmt_ipv4("172.20.20.2"),
            FakeNode::new("b", "t", rt.clone()),
            FakeNode::new("c", "t", rt.clone()),
        ]);
        let graph = build(&map).unwrap();
        let deps = graph.dependency_map();
        assert_eq!(deps["a"], vec!["b", "c"]);
        assert!(deps["b"].is_empty());
        assert_eq!(graph.node("b").unwrap().gate(Stage::Create).pending(), 1);
    }

    #[test]
    fn wait_for_edges_land_on_declared_stage() {
        let rt = docker();
        let mut stages = Stages::default();
        stages
            .configure
            .wait_for
            .push(WaitFor::new("a", Stage::Healthy));
        let map = nodes(vec![
            FakeNode::new("a", "t", rt.clone()),
            FakeNode::new("b", "t", rt.clone()).with_stages(stages),
        ]);
        let graph = build(&map).unwrap();
        assert_eq!(graph.node("b").unwrap().gate(Stage::Configure).pending(), 1);
        assert!(graph.node("a").unwrap().must_wait(Stage::Healthy));
    }

    #[test]
    fn wait_for_unknown_node_fails() {
        let mut stages = Stages::default();
        stages.create.wait_for.push(WaitFor::new("ghost", Stage::Create));
        let map = nodes(vec![FakeNode::new("a", "t", docker()).with_stages(stages)]);
        let err = build(&map).err().unwrap();
        assert!(matches!(err, DependencyError::DependeeNotFound { dependee, .. } if dependee == "ghost"));
    }

    #[test]
    fn serial_runtime_nodes_are_chained() {
        let vm = Arc::new(FakeRuntime::serial("ignite"));
        let map = nodes(vec![
            FakeNode::new("vm3", "t", vm.clone()),
            FakeNode::new("vm1", "t", vm.clone()),
            FakeNode::new("vm2", "t", vm.clone()),
            FakeNode::new("ctr", "t", docker()),
        ]);
        let graph = build(&map).unwrap();
        let deps = graph.dependency_map();
        assert_eq!(deps["vm1"], vec!["vm2"]);
        assert_eq!(deps["vm2"], vec!["vm3"]);
        assert!(deps["vm3"].is_empty());
        assert!(deps["ctr"].is_empty());
    }

    #[test]
    fn namespace_sharing_edges() {
        let rt = docker();
        let map = nodes(vec![
            FakeNode::new("node2", "t", rt.clone()),
            FakeNode::new("node3", "t", rt.clone()).with_network_mode("container:node2"),
            FakeNode::new("node4", "t", rt.clone()).with_network_mode("container:outside"),
        ]);
        let graph = build(&map).unwrap();
        let deps = graph.dependency_map();
        assert_eq!(deps["node2"], vec!["node3"]);
        assert_eq!(graph.node("node4").unwrap().gate(Stage::Create).pending(), 0);
    }

    #[test]
    fn user_cycle_is_rejected_before_scheduling() {
        let rt = docker();
        let mut a_stages = Stages::default();
        a_stages.create.wait_for.push(WaitFor::new("b", Stage::Create));
        let map = nodes(vec![
            FakeNode::new("a", "t", rt.clone()).with_stages(a_stages),
            FakeNode::new("b", "t", rt.clone()).with_network_mode("container:a"),
        ]);
        assert!(matches!(build(&map), Err(DependencyError::Cyclic(_))));
    }

    #[test]
    fn static_node_waiting_on_dynamic_node_health_is_rejected() {
        let rt = docker();
        let mut a_stages = Stages::default();
        a_stages.create.wait_for.push(WaitFor::new("b", Stage::Healthy));
        let map = nodes(vec![
            FakeNode::new("a", "t", rt.clone())
                .with_mgmt_ipv4("172.20.20.2")
                .with_stages(a_stages),
            FakeNode::new("b", "t", rt.clone()),
        ]);
        let Err(DependencyError::Cyclic(listing)) = build(&map) else {
            panic!("expected cycle error");
        };
        assert!(listing.contains("a -> [ b ]"));
        assert!(listing.contains("b -> [ a ]"));
    }
}
