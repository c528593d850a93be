//! The namespace operations the lifecycle controller relies on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use topo_core::Endpoint;

use crate::error::{NetnsError, NetnsResult};

/// Result of moving a batch of endpoints. Moves stop at the first failure;
/// `moved` lists exactly the endpoints that changed namespace.
#[derive(Debug, Default)]
pub struct MoveOutcome {
    pub moved: Vec<Endpoint>,
    pub error: Option<NetnsError>,
}

impl MoveOutcome {
    pub fn into_result(self) -> NetnsResult<Vec<Endpoint>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.moved),
        }
    }
}

/// Namespace-scoped interface operations.
///
/// Implementations must run every interface operation with the executing
/// OS thread inside the namespace it targets.
#[async_trait]
pub trait NamespaceOps: Send + Sync {
    /// Path of the named namespace `name`.
    fn named_path(&self, name: &str) -> PathBuf;

    /// Create the named namespace unless it already exists.
    async fn ensure_named(&self, name: &str) -> NetnsResult<PathBuf>;

    async fn exists(&self, ns: &Path) -> bool;

    /// Move `endpoints` from namespace `from` into `to`, in order. With
    /// `set_down`, each interface is brought down before it moves.
    async fn move_endpoints(
        &self,
        from: &Path,
        to: &Path,
        endpoints: &[Endpoint],
        set_down: bool,
    ) -> MoveOutcome;

    async fn set_endpoints_up(&self, ns: &Path, endpoints: &[Endpoint]) -> NetnsResult<()>;

    /// Point the per-container alias `<netns dir>/<container>` at `ns`.
    async fn link_container_ns(&self, container: &str, ns: &Path) -> NetnsResult<()>;
}
