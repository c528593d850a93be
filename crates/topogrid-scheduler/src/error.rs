//! Scheduler error types.

use thiserror::Error;

/// Errors that abort a whole deployment.
///
/// Per-node failures never show up here; they are contained and reported
/// through [`DeployReport`](crate::DeployReport).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("dependency error: {0}")]
    Dependency(#[from] topogrid_deps::DependencyError),

    #[error("lab error: {0}")]
    Core(#[from] topo_core::CoreError),

    #[error("scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
