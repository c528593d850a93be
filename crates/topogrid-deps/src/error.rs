//! Dependency graph error types.

use thiserror::Error;

/// Errors raised while building or validating the dependency graph.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("node {0:?} is already registered")]
    DuplicateNode(String),

    #[error("node {0:?} is not registered in the dependency graph")]
    UnknownNode(String),

    #[error("dependee node {dependee} not found (referenced by {depender})")]
    DependeeNotFound { dependee: String, depender: String },

    #[error("cyclic dependencies found\n{0}")]
    Cyclic(String),
}

pub type DependencyResult<T> = Result<T, DependencyError>;
