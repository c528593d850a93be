//! [`NamespaceOps`] over rtnetlink.
//!
//! Namespace membership is per thread, so every operation runs on a
//! dedicated OS thread that joins the target namespace with `setns(2)`,
//! opens its own netlink socket there, and drives it with a current-thread
//! runtime. Threads are never reused, so no namespace leaks into the
//! caller's runtime.
//!
//! ```text
//! caller task ──► std::thread ── setns(ns) ── new_connection() ── op(handle)
//!      ▲                                                              │
//!      └──────────────────── oneshot result ◄─────────────────────────┘
//! ```

use std::fs::File;
use std::future::Future;
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::link::{LinkAttribute, LinkMessage, Prop};
use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, setns, unshare};
use rtnetlink::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

use topo_core::Endpoint;

use crate::error::{NetnsError, NetnsResult};
use crate::ops::{MoveOutcome, NamespaceOps};

/// Namespace operations against the running kernel.
#[derive(Debug, Clone)]
pub struct NetlinkNamespaces {
    netns_dir: PathBuf,
}

impl NetlinkNamespaces {
    pub fn new(netns_dir: impl Into<PathBuf>) -> Self {
        Self {
            netns_dir: netns_dir.into(),
        }
    }
}

fn open_ns(ns: &Path) -> NetnsResult<File> {
    File::open(ns).map_err(|e| match e.kind() {
        ErrorKind::NotFound => NetnsError::NamespaceNotFound(ns.to_path_buf()),
        _ => NetnsError::Io(e),
    })
}

/// Run `op` on a fresh thread inside namespace `ns`.
async fn run_in_netns<T, F, Fut>(ns: &Path, op: F) -> NetnsResult<T>
where
    T: Send + 'static,
    F: FnOnce(Handle) -> Fut + Send + 'static,
    Fut: Future<Output = NetnsResult<T>>,
{
    let ns = ns.to_path_buf();
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("topogrid-netns".to_string())
        .spawn(move || {
            let _ = tx.send(enter_and_run(&ns, op));
        })?;
    rx.await
        .map_err(|_| NetnsError::Thread("namespace worker exited without a result".into()))?
}

fn enter_and_run<T, F, Fut>(ns: &Path, op: F) -> NetnsResult<T>
where
    F: FnOnce(Handle) -> Fut,
    Fut: Future<Output = NetnsResult<T>>,
{
    let target = open_ns(ns)?;
    setns(&target, CloneFlags::CLONE_NEWNET)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async move {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        op(handle).await
    })
}

fn link_matches(msg: &LinkMessage, ep: &Endpoint) -> bool {
    let wanted = |name: &str| name == ep.iface_name || ep.iface_alias.as_deref() == Some(name);
    msg.attributes.iter().any(|attr| match attr {
        LinkAttribute::IfAlias(alias) => wanted(alias),
        LinkAttribute::PropList(props) => props
            .iter()
            .any(|p| matches!(p, Prop::AltIfName(alt) if wanted(alt))),
        _ => false,
    })
}

/// Interface index of `ep`: by name first, then by alias or altname.
async fn find_link(handle: &Handle, ep: &Endpoint, ns: &Path) -> NetnsResult<u32> {
    let mut by_name = handle
        .link()
        .get()
        .match_name(ep.iface_name.clone())
        .execute();
    if let Ok(Some(msg)) = by_name.try_next().await {
        return Ok(msg.header.index);
    }

    let mut links = handle.link().get().execute();
    while let Some(msg) = links.try_next().await? {
        if link_matches(&msg, ep) {
            return Ok(msg.header.index);
        }
    }
    Err(NetnsError::LinkNotFound {
        iface: ep.iface_name.clone(),
        ns: ns.to_path_buf(),
    })
}

#[async_trait]
impl NamespaceOps for NetlinkNamespaces {
    fn named_path(&self, name: &str) -> PathBuf {
        self.netns_dir.join(name)
    }

    async fn ensure_named(&self, name: &str) -> NetnsResult<PathBuf> {
        let path = self.named_path(name);
        if self.exists(&path).await {
            debug!(ns = %path.display(), "reusing named namespace");
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.netns_dir).await?;

        // unshare(2) moves the calling thread into the new namespace; the
        // bind mount keeps it alive after the thread exits.
        let target = path.clone();
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("topogrid-netns-create".to_string())
            .spawn(move || {
                let created = (|| -> NetnsResult<()> {
                    File::create(&target)?;
                    unshare(CloneFlags::CLONE_NEWNET)?;
                    mount(
                        Some("/proc/thread-self/ns/net"),
                        target.as_path(),
                        None::<&str>,
                        MsFlags::MS_BIND,
                        None::<&str>,
                    )?;
                    Ok(())
                })();
                if created.is_err() {
                    let _ = std::fs::remove_file(&target);
                }
                let _ = tx.send(created);
            })?;
        rx.await
            .map_err(|_| NetnsError::Thread("namespace creation thread exited".into()))??;

        info!(ns = %path.display(), "created named namespace");
        Ok(path)
    }

    async fn exists(&self, ns: &Path) -> bool {
        tokio::fs::try_exists(ns).await.unwrap_or(false)
    }

    async fn move_endpoints(
        &self,
        from: &Path,
        to: &Path,
        endpoints: &[Endpoint],
        set_down: bool,
    ) -> MoveOutcome {
        let from_path = from.to_path_buf();
        let to_path = to.to_path_buf();
        let endpoints = endpoints.to_vec();

        let result = run_in_netns(from, move |handle| async move {
            let target = open_ns(&to_path)?;
            let mut outcome = MoveOutcome::default();
            for ep in endpoints {
                let step = async {
                    let index = find_link(&handle, &ep, &from_path).await?;
                    if set_down {
                        handle.link().set(index).down().execute().await?;
                    }
                    handle
                        .link()
                        .set(index)
                        .setns_by_fd(target.as_raw_fd())
                        .execute()
                        .await?;
                    Ok::<_, NetnsError>(())
                }
                .await;
                match step {
                    Ok(()) => {
                        debug!(endpoint = %ep, to = %to_path.display(), "moved interface");
                        outcome.moved.push(ep);
                    }
                    Err(e) => {
                        outcome.error = Some(e);
                        break;
                    }
                }
            }
            Ok(outcome)
        })
        .await;

        result.unwrap_or_else(|e| MoveOutcome {
            moved: Vec::new(),
            error: Some(e),
        })
    }

    async fn set_endpoints_up(&self, ns: &Path, endpoints: &[Endpoint]) -> NetnsResult<()> {
        let ns_path = ns.to_path_buf();
        let endpoints = endpoints.to_vec();
        run_in_netns(ns, move |handle| async move {
            for ep in &endpoints {
                let index = find_link(&handle, ep, &ns_path).await?;
                handle.link().set(index).up().execute().await?;
            }
            Ok(())
        })
        .await
    }

    async fn link_container_ns(&self, container: &str, ns: &Path) -> NetnsResult<()> {
        tokio::fs::create_dir_all(&self.netns_dir).await?;
        let alias = self.netns_dir.join(container);
        match tokio::fs::remove_file(&alias).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::symlink(ns, &alias).await?;
        debug!(alias = %alias.display(), target = %ns.display(), "linked container namespace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alias_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let ops = NetlinkNamespaces::new(dir.path().join("netns"));

        ops.link_container_ns("clab-t-r1", Path::new("/proc/1/ns/net"))
            .await
            .unwrap();
        ops.link_container_ns("clab-t-r1", Path::new("/run/netns/clab-park-clab-t-r1"))
            .await
            .unwrap();

        let target = std::fs::read_link(dir.path().join("netns/clab-t-r1")).unwrap();
        assert_eq!(target, PathBuf::from("/run/netns/clab-park-clab-t-r1"));
    }

    #[tokio::test]
    async fn missing_namespace_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ops = NetlinkNamespaces::new(dir.path());
        let missing = dir.path().join("nope");
        assert!(!ops.exists(&missing).await);

        let outcome = ops
            .move_endpoints(&missing, &missing, &[Endpoint::veth("r1", "eth1")], true)
            .await;
        assert!(outcome.moved.is_empty());
        assert!(matches!(outcome.error, Some(NetnsError::NamespaceNotFound(_))));
    }

    #[test]
    fn named_paths_live_under_netns_dir() {
        let ops = NetlinkNamespaces::new("/run/netns");
        assert_eq!(
            ops.named_path("clab-park-x"),
            PathBuf::from("/run/netns/clab-park-x")
        );
    }
}
