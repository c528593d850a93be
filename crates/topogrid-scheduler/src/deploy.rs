//! One-call deployment of a lab.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use topo_core::{ExecCollection, Lab};

use crate::error::SchedulerResult;
use crate::report::DeployReport;
use crate::scheduler::{Scheduler, SchedulerConfig};

/// Result of [`deploy`].
pub struct Deployment {
    pub report: DeployReport,
    pub exec_log: Arc<ExecCollection>,
}

/// Resolve links, build and validate the dependency graph, then schedule
/// every node of `lab`.
///
/// Construction errors (unknown wait-for targets, cycles) abort before any
/// node is touched. Per-node failures end up in the report.
pub async fn deploy(lab: &Lab, cancel: CancellationToken) -> SchedulerResult<Deployment> {
    lab.resolve_links().await?;
    let graph = topogrid_deps::build(&lab.nodes)?;

    let scheduler = Scheduler::new(
        SchedulerConfig::from(&lab.settings),
        lab.deploy_params(),
        lab.runtime.clone(),
    );
    let handle = scheduler.schedule(graph, cancel);
    let exec_log = handle.exec_log();
    let report = handle.wait().await?;

    report.log();
    exec_log.log();
    info!(lab = %lab.name, failed = report.failed().len(), "deployment finished");
    Ok(Deployment { report, exec_log })
}
