//! Namespace operation error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetnsError {
    #[error("network namespace {0} does not exist")]
    NamespaceNotFound(PathBuf),

    #[error("interface {iface} not found in namespace {ns}")]
    LinkNotFound { iface: String, ns: PathBuf },

    #[error("namespace worker thread failed: {0}")]
    Thread(String),

    #[error("{0}")]
    Operation(String),

    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("system call error: {0}")]
    Nix(#[from] nix::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NetnsResult<T> = Result<T, NetnsError>;
