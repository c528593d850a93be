//! Core error types.

use thiserror::Error;

/// Errors raised while parsing definitions or looking up lab state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown stage {0:?}")]
    UnknownStage(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("invalid command {command:?}: {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("node {0:?} is not present in the topology")]
    NodeNotFound(String),

    #[error("link resolution failed: {0}")]
    LinkResolution(String),

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
