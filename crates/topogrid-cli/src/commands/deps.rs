use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::info;

use topo_core::TopologyFile;
use topogrid_deps::{DependencyError, render_map};

use crate::offline::nodes_from_topology;

/// Dependency listing of one topology.
pub struct DepsReport {
    pub lab: String,
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Why no creation order exists, when it does not.
    pub cycle: Option<String>,
}

impl DepsReport {
    pub fn is_acyclic(&self) -> bool {
        self.cycle.is_none()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "lab": self.lab,
            "dependencies": self.dependencies,
            "acyclic": self.is_acyclic(),
            "cycle": self.cycle,
        })
    }
}

pub fn inspect(path: &Path) -> Result<DepsReport> {
    let topo = TopologyFile::from_file(path)
        .with_context(|| format!("Failed to load topology {}", path.display()))?;
    let nodes = nodes_from_topology(&topo);
    let graph = topogrid_deps::derive(&nodes)?;

    let cycle = match graph.check_acyclicity() {
        Ok(()) => None,
        Err(DependencyError::Cyclic(remaining)) => Some(remaining),
        Err(e) => return Err(e.into()),
    };
    Ok(DepsReport {
        lab: topo.name,
        dependencies: graph.dependency_map(),
        cycle,
    })
}

pub fn deps(path: &str, format: &str) -> Result<()> {
    let report = inspect(Path::new(path))?;
    info!(lab = %report.lab, nodes = report.dependencies.len(), "inspected topology");

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
        "text" => {
            println!("lab {}: {} nodes", report.lab, report.dependencies.len());
            print!("{}", render_map(&report.dependencies));
            match &report.cycle {
                None => println!("dependency graph is acyclic"),
                Some(remaining) => {
                    println!("cyclic dependencies between:");
                    print!("{remaining}");
                }
            }
        }
        other => bail!("unknown output format {other:?} (expected text or json)"),
    }

    if !report.is_acyclic() {
        bail!("topology {} has cyclic dependencies", report.lab);
    }
    Ok(())
}
