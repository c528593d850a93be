//! topogrid-lifecycle — stop, start, and restart deployed nodes without
//! losing their dataplane links.
//!
//! Stopping a container destroys its network namespace and with it every
//! veth end living there. Before a stop, the node's interfaces are moved
//! into a per-node parking namespace (`clab-park-<container>`) and set
//! down; a start moves them back and brings them up.
//!
//! # Architecture
//!
//! ```text
//! LifecycleController
//!   ├── LabLock (flock on <lab dir>/.clab.lock)
//!   ├── validate (node shape, veth-only links)
//!   └── transition
//!         ├── stop_node ── pre-stop cleanup ── rollback on failure
//!         └── start_node ─────────────────────  rollback on failure
//!                │
//!                ▼
//!          NamespaceOps (topogrid-netns)
//! ```

pub mod controller;
pub mod error;
pub mod lock;
pub mod prestop;
pub mod transition;
pub mod validate;

pub use controller::LifecycleController;
pub use error::{LifecycleError, LifecycleResult};
pub use lock::{LOCK_FILE_NAME, LabLock, lock_path};
pub use transition::{StartPhase, StopPhase, start_node, stop_node};
pub use validate::{namespace_providers, validate_node, veth_endpoints};
