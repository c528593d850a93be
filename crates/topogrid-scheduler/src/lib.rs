//! topogrid-scheduler — bounded worker-pool scheduler.
//!
//! Takes a fully built [`DependencyGraph`](topogrid_deps::DependencyGraph)
//! and drives every node through the deployment stages:
//! - per-node coordinating tasks wait on the Create gate so blocked nodes
//!   never hold a worker
//! - `min(max_workers, nodes)` workers run the pipeline
//! - per-node failures halt that node only and release its dependers with
//!   a failure mark
//! - a [`DeployReport`] records what every node completed

pub mod deploy;
pub mod error;
pub mod external;
mod pipeline;
pub mod report;
pub mod scheduler;

pub use deploy::{Deployment, deploy};
pub use error::{SchedulerError, SchedulerResult};
pub use external::{ExternalWait, wait_for_external_namespace};
pub use report::{DeployReport, Halt, NodeOutcome, StageSummary, Step};
pub use scheduler::{ScheduleHandle, Scheduler, SchedulerConfig};
