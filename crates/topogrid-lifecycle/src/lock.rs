//! Per-lab advisory lock.
//!
//! Lifecycle operations against one lab are serialized through an
//! exclusive `flock` on `<lab dir>/.clab.lock`. Before the first deploy the
//! lab directory does not exist yet, so the lock lives under the scratch
//! directory instead, named after a hash of the topology path and lab name.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use topo_core::LabPaths;

use crate::error::{LifecycleError, LifecycleResult};

pub const LOCK_FILE_NAME: &str = ".clab.lock";

/// Where the lock for `lab_name` lives.
pub fn lock_path(paths: &LabPaths, lab_name: &str, tmp_dir: &Path) -> PathBuf {
    if paths.lab_dir.is_dir() {
        return paths.lab_dir.join(LOCK_FILE_NAME);
    }

    let input = match &paths.topology_file {
        Some(topo) => {
            let abs = std::path::absolute(topo).unwrap_or_else(|_| topo.clone());
            format!("{}|{lab_name}", abs.display())
        }
        None => lab_name.to_string(),
    };
    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    tmp_dir.join("locks").join(format!("{}.lock", &digest[..10]))
}

/// Held lab lock. Released on drop.
#[derive(Debug)]
pub struct LabLock {
    file: File,
    path: PathBuf,
}

impl LabLock {
    /// Block until the exclusive lock at `path` is ours.
    pub async fn acquire(path: PathBuf) -> LifecycleResult<Self> {
        let lock_err = |path: &Path, source| LifecycleError::Lock {
            path: path.to_path_buf(),
            source,
        };

        let target = path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&target)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| lock_err(&path, std::io::Error::other(e)))?
        .map_err(|e| lock_err(&path, e))?;

        debug!(path = %path.display(), "acquired lab lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LabLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release lab lock");
        }
    }
}
