//! Cycle detection by topological peeling.
//!
//! Works on a plain `dependee -> [dependers]` adjacency, independent of the
//! live gates. Each round removes every node without outstanding dependers
//! and strips it from the depender lists of the nodes it depends on. A round
//! that removes nothing while nodes remain leaves exactly the nodes that sit
//! on, or lead into, a cycle.

use std::collections::{BTreeMap, BTreeSet};

/// Result of peeling an adjacency map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeelOutcome {
    /// Number of non-empty removal rounds.
    pub rounds: usize,
    /// Nodes in the order they were removed.
    pub removed: Vec<String>,
    /// Adjacency of the nodes that could not be removed.
    pub remaining: BTreeMap<String, Vec<String>>,
}

impl PeelOutcome {
    pub fn is_acyclic(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Peel `adjacency` until no leaves are left. Runs in O(V + E) overall.
///
/// Nodes that only appear as dependers are treated as nodes without
/// dependers of their own.
pub fn peel(adjacency: &BTreeMap<String, Vec<String>>) -> PeelOutcome {
    // Distinct dependers per node, and the reverse direction for stripping.
    let mut outstanding: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependees_of: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (dependee, dependers) in adjacency {
        let distinct: BTreeSet<&str> = dependers.iter().map(String::as_str).collect();
        outstanding.insert(dependee.as_str(), distinct.len());
        for depender in distinct {
            outstanding.entry(depender).or_insert(0);
            dependees_of.entry(depender).or_default().push(dependee.as_str());
        }
    }

    let mut leaves: Vec<&str> = outstanding
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut outcome = PeelOutcome::default();
    let mut removed: BTreeSet<&str> = BTreeSet::new();

    while !leaves.is_empty() {
        outcome.rounds += 1;
        let mut next = Vec::new();
        for leaf in leaves {
            removed.insert(leaf);
            outcome.removed.push(leaf.to_string());
            for dependee in dependees_of.get(leaf).into_iter().flatten() {
                if let Some(count) = outstanding.get_mut(dependee) {
                    *count -= 1;
                    if *count == 0 {
                        next.push(*dependee);
                    }
                }
            }
        }
        leaves = next;
    }

    outcome.remaining = adjacency
        .iter()
        .filter(|(name, _)| !removed.contains(name.as_str()))
        .map(|(name, dependers)| {
            let left = dependers
                .iter()
                .filter(|d| !removed.contains(d.as_str()))
                .cloned()
                .collect();
            (name.clone(), left)
        })
        .collect();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adj(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn isolated_node_is_acyclic() {
        let out = peel(&adj(&[("a", &[])]));
        assert!(out.is_acyclic());
        assert_eq!(out.rounds, 1);
        assert_eq!(out.removed, vec!["a"]);
    }

    #[test]
    fn empty_graph_is_acyclic() {
        let out = peel(&BTreeMap::new());
        assert!(out.is_acyclic());
        assert_eq!(out.rounds, 0);
    }

    #[test]
    fn self_loop_is_cyclic() {
        let out = peel(&adj(&[("a", &["a"])]));
        assert!(!out.is_acyclic());
        assert_eq!(out.remaining["a"], vec!["a"]);
    }

    #[test]
    fn chain_of_seven_with_back_edge_is_cyclic() {
        let names = ["n1", "n2", "n3", "n4", "n5", "n6", "n7"];
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for pair in names.windows(2) {
            map.insert(pair[0].to_string(), vec![pair[1].to_string()]);
        }
        map.insert("n7".to_string(), vec![]);
        let out = peel(&map);
        assert!(out.is_acyclic());
        assert_eq!(out.rounds, 7);
        assert_eq!(out.removed.first().map(String::as_str), Some("n7"));

        map.insert("n7".to_string(), vec!["n1".to_string()]);
        let out = peel(&map);
        assert_eq!(out.remaining.len(), 7);
        assert_eq!(out.rounds, 0);
    }

    #[test]
    fn branching_graph_peels_every_node_once() {
        // root feeds two branches that join again.
        let map = adj(&[
            ("root", &["left", "right"]),
            ("left", &["join"]),
            ("right", &["join", "tail"]),
            ("join", &["tail"]),
            ("tail", &[]),
        ]);
        let out = peel(&map);
        assert!(out.is_acyclic());
        assert!(out.rounds <= map.len());
        let mut removed = out.removed.clone();
        removed.sort();
        removed.dedup();
        assert_eq!(removed.len(), map.len());
        assert_eq!(out.removed.last().map(String::as_str), Some("root"));
    }

    #[test]
    fn cycle_in_branch_keeps_upstream_nodes() {
        let map = adj(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["b", "d"]),
            ("d", &[]),
        ]);
        let out = peel(&map);
        assert_eq!(out.removed, vec!["d"]);
        let remaining: Vec<&str> = out.remaining.keys().map(String::as_str).collect();
        assert_eq!(remaining, vec!["a", "b", "c"]);
        assert_eq!(out.remaining["c"], vec!["b"]);
    }

    #[test]
    fn duplicate_edges_count_once() {
        let out = peel(&adj(&[("a", &["b", "b"]), ("b", &[])]));
        assert!(out.is_acyclic());
        assert_eq!(out.removed, vec!["b", "a"]);
    }

    #[test]
    fn dependers_missing_from_keys_are_leaves() {
        let out = peel(&adj(&[("a", &["ghost"])]));
        assert!(out.is_acyclic());
        assert_eq!(out.removed, vec!["ghost", "a"]);
    }
}
