//! Lifecycle preconditions, checked before anything is touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use topo_core::{Endpoint, LinkType, Node, NodeMap};

use crate::error::{LifecycleError, LifecycleResult};

/// Topology nodes whose namespace is joined by other topology nodes,
/// mapped to the names of those nodes.
pub fn namespace_providers(nodes: &NodeMap) -> BTreeMap<String, Vec<String>> {
    let mut providers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for node in nodes.values() {
        let Some(target) = node.config().shared_namespace_ref() else {
            continue;
        };
        if nodes.contains_key(target) {
            providers
                .entry(target.to_string())
                .or_default()
                .push(node.short_name().to_string());
        }
    }
    providers
}

fn unsupported(node: &str, reason: impl Into<String>) -> LifecycleError {
    LifecycleError::Unsupported {
        node: node.to_string(),
        reason: reason.into(),
    }
}

/// Look up `name` and reject node shapes stop/start cannot handle.
pub async fn validate_node<'a>(
    nodes: &'a NodeMap,
    name: &str,
    providers: &BTreeMap<String, Vec<String>>,
) -> LifecycleResult<&'a Arc<dyn Node>> {
    let node = nodes
        .get(name)
        .ok_or_else(|| LifecycleError::NodeNotFound(name.to_string()))?;
    let cfg = node.config();

    if cfg.root_namespace_based {
        return Err(unsupported(name, "node lives in the root namespace"));
    }
    if cfg.auto_remove {
        return Err(unsupported(name, "auto-remove is enabled"));
    }
    if let Some(mode) = cfg.network_mode.as_deref().filter(|m| m.starts_with("container:")) {
        return Err(unsupported(name, format!("uses network-mode {mode:?}")));
    }
    if let Some(dependers) = providers.get(name).filter(|d| !d.is_empty()) {
        return Err(unsupported(
            name,
            format!("provides the network namespace of {}", dependers.join(", ")),
        ));
    }

    let containers = node
        .containers()
        .await
        .map_err(|e| LifecycleError::step(name, "listing containers", e))?;
    if containers.len() != 1 {
        return Err(unsupported(
            name,
            format!("expected 1 container, got {}", containers.len()),
        ));
    }

    Ok(node)
}

/// The node's endpoints, provided every one of them is a veth.
pub fn veth_endpoints(node: &dyn Node) -> LifecycleResult<Vec<Endpoint>> {
    let endpoints = node.endpoints();
    if let Some(ep) = endpoints.iter().find(|ep| ep.link_type != LinkType::Veth) {
        return Err(LifecycleError::UnsupportedLink {
            node: node.short_name().to_string(),
            link_type: ep.link_type,
            endpoint: ep.to_string(),
        });
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use topo_core::testing::{FakeNode, FakeRuntime};

    use super::*;

    fn nodes(list: Vec<FakeNode>) -> NodeMap {
        list.into_iter()
            .map(|n| (n.short_name().to_string(), Arc::new(n) as Arc<dyn Node>))
            .collect()
    }

    #[test]
    fn providers_only_count_topology_nodes() {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let map = nodes(vec![
            FakeNode::new("a", "t", rt.clone()),
            FakeNode::new("b", "t", rt.clone()).with_network_mode("container:a"),
            FakeNode::new("c", "t", rt.clone()).with_network_mode("container:a"),
            FakeNode::new("d", "t", rt).with_network_mode("container:vpn"),
        ]);
        let providers = namespace_providers(&map);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers["a"], vec!["b", "c"]);
    }

    #[tokio::test]
    async fn rejects_unsupported_shapes() {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let map = nodes(vec![
            FakeNode::new("ok", "t", rt.clone()),
            FakeNode::new("host", "t", rt.clone()).with_config(|c| c.root_namespace_based = true),
            FakeNode::new("auto", "t", rt.clone()).with_config(|c| c.auto_remove = true),
            FakeNode::new("prov", "t", rt.clone()),
            FakeNode::new("joiner", "t", rt).with_network_mode("container:prov"),
        ]);
        let providers = namespace_providers(&map);

        assert!(validate_node(&map, "ok", &providers).await.is_ok());
        assert!(matches!(
            validate_node(&map, "ghost", &providers).await,
            Err(LifecycleError::NodeNotFound(_))
        ));
        for name in ["host", "auto", "prov", "joiner"] {
            let err = validate_node(&map, name, &providers).await.err().unwrap();
            assert!(
                matches!(&err, LifecycleError::Unsupported { node, .. } if node == name),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn only_veth_links_pass() {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let mut bridge = Endpoint::veth("r1", "eth2");
        bridge.link_type = LinkType::Bridge;
        let node = FakeNode::new("r1", "t", rt.clone())
            .with_endpoints(vec![Endpoint::veth("r1", "eth1"), bridge]);
        let err = veth_endpoints(&node).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::UnsupportedLink { link_type: LinkType::Bridge, .. }
        ));

        let node = FakeNode::new("r2", "t", rt).with_endpoints(vec![Endpoint::veth("r2", "eth1")]);
        assert_eq!(veth_endpoints(&node).unwrap().len(), 1);
    }
}
