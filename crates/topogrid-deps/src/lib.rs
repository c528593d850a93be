//! topogrid-deps — dependency graph and stage gates.
//!
//! Every node of a deployment is wrapped in a [`DependencyNode`] holding one
//! [`StageGate`] per [`Stage`](topo_core::Stage) and, per stage, the
//! dependers to release when that stage is done.
//!
//! # Architecture
//!
//! ```text
//! NodeMap ──► rules::build
//!               ├── static_before_dynamic
//!               ├── wait_for
//!               ├── runtime_serialization
//!               └── namespace_sharing
//!                        │
//!                        ▼
//!               DependencyGraph ── check_acyclicity ──► cycle::peel
//!                 └── DependencyNode
//!                       ├── gates[stage]      (countdown, watch-backed)
//!                       └── dependers[stage]  (released by done/abandon)
//! ```

pub mod cycle;
pub mod error;
pub mod gate;
pub mod graph;
pub mod node;
pub mod rules;

pub use cycle::{PeelOutcome, peel};
pub use error::{DependencyError, DependencyResult};
pub use gate::{GateOutcome, StageGate};
pub use graph::{DependencyGraph, render_map};
pub use node::{Depender, DependencyNode};
pub use rules::{build, derive};
