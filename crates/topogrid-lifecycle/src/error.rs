//! Lifecycle error types.

use std::path::PathBuf;

use thiserror::Error;

use topo_core::LinkType;

/// Errors surfaced by stop, start, and restart.
///
/// Precondition failures (`NodeNotFound`, `NoNodes`, `Unsupported`,
/// `UnsupportedLink`, `ContainerNotFound`, `MissingParkingNamespace`) are
/// raised before any side effect.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("node {0:?} is not present in the topology")]
    NodeNotFound(String),

    #[error("lab {0:?} has no nodes")]
    NoNodes(String),

    #[error("node {node:?} is not supported: {reason}")]
    Unsupported { node: String, reason: String },

    #[error("node {node:?} lifecycle supports only veth links, got {link_type} for endpoint {endpoint}")]
    UnsupportedLink {
        node: String,
        link_type: LinkType,
        endpoint: String,
    },

    #[error("node {node:?} container {container:?} not found")]
    ContainerNotFound { node: String, container: String },

    #[error("node {node:?} has no parking namespace {namespace:?}; start requires a node stopped by topogrid")]
    MissingParkingNamespace { node: String, namespace: String },

    #[error("node {node:?} failed {step}: {reason}")]
    Step {
        node: String,
        step: &'static str,
        reason: String,
    },

    #[error("node {node:?} failed {step}: {reason} (rollback failed: {rollback})")]
    RollbackFailed {
        node: String,
        step: &'static str,
        reason: String,
        rollback: String,
    },

    #[error("lab lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lifecycle operation cancelled")]
    Cancelled,

    #[error("lab error: {0}")]
    Core(#[from] topo_core::CoreError),

    #[error("namespace error: {0}")]
    Netns(#[from] topogrid_netns::NetnsError),
}

impl LifecycleError {
    pub(crate) fn step(node: &str, step: &'static str, reason: impl ToString) -> Self {
        LifecycleError::Step {
            node: node.to_string(),
            step,
            reason: reason.to_string(),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
