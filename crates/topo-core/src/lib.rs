//! topo-core — shared types for the topogrid lab orchestrator.
//!
//! Everything the dependency engine, the scheduler, and the lifecycle
//! controller agree on lives here:
//!
//! - [`Stage`] and the per-stage `wait-for` / exec hook definitions
//! - [`NodeConfig`], the static definition of one emulated device
//! - the [`Node`] and [`ContainerRuntime`] capability traits that concrete
//!   node kinds and runtime backends implement
//! - [`ExecCmd`] / [`ExecResult`] / [`ExecCollection`] for exec hooks
//! - [`LabSettings`] and [`TopologyFile`] configuration
//! - [`Lab`], the in-memory view of a deployed or to-be-deployed lab
//!
//! # Architecture
//!
//! ```text
//! Lab
//!   ├── NodeMap (short name → Arc<dyn Node>)
//!   │     └── Node ── runtime() ──► Arc<dyn ContainerRuntime>
//!   ├── LabPaths (lab dir, topology file)
//!   ├── LabSettings (workers, poll intervals, netns dir)
//!   └── LinkResolver (attaches endpoints to nodes)
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod lab;
pub mod node;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{LabSettings, NodeDefaults, NodeDefinition, TopologyFile, parse_duration};
pub use error::{CoreError, CoreResult};
pub use exec::{ExecCmd, ExecCollection, ExecFormat, ExecResult};
pub use lab::{Lab, LabPaths, LinkResolver};
pub use node::{ContainerRuntime, DeployParams, Node, NodeMap, PullPolicy};
pub use types::{
    ContainerStatus, Endpoint, ExecPhase, ExecTarget, GenericContainer, LinkType, NodeConfig,
    Stage, StageConfig, StageExec, Stages, WaitFor,
};
