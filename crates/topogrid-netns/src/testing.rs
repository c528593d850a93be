//! In-memory [`NamespaceOps`] with failure injection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use topo_core::Endpoint;

use crate::error::{NetnsError, NetnsResult};
use crate::ops::{MoveOutcome, NamespaceOps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIface {
    pub name: String,
    pub alias: Option<String>,
    pub up: bool,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<PathBuf, BTreeMap<String, FakeIface>>,
    aliases: BTreeMap<String, PathBuf>,
    moves: usize,
    fail_move_at: Option<usize>,
    fail_moves_from: Option<usize>,
    fail_set_up: bool,
    fail_next_link: bool,
}

/// Namespaces as maps of interfaces.
///
/// Every move attempt gets a sequence number starting at 0, across calls,
/// so tests can fail e.g. the third interface of a stop.
pub struct FakeNamespaces {
    netns_dir: PathBuf,
    state: Mutex<State>,
}

impl FakeNamespaces {
    pub fn new(netns_dir: impl Into<PathBuf>) -> Self {
        Self {
            netns_dir: netns_dir.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_namespace(&self, ns: impl Into<PathBuf>) {
        self.state().namespaces.entry(ns.into()).or_default();
    }

    pub fn add_iface(&self, ns: &Path, name: &str, alias: Option<&str>, up: bool) {
        self.state()
            .namespaces
            .entry(ns.to_path_buf())
            .or_default()
            .insert(
                name.to_string(),
                FakeIface {
                    name: name.to_string(),
                    alias: alias.map(str::to_string),
                    up,
                },
            );
    }

    pub fn ifaces(&self, ns: &Path) -> Vec<FakeIface> {
        self.state()
            .namespaces
            .get(ns)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn alias_target(&self, container: &str) -> Option<PathBuf> {
        self.state().aliases.get(container).cloned()
    }

    pub fn set_alias(&self, container: &str, ns: &Path) {
        self.state()
            .aliases
            .insert(container.to_string(), ns.to_path_buf());
    }

    /// Fail only the move with sequence number `n`.
    pub fn fail_move_at(&self, n: usize) {
        self.state().fail_move_at = Some(n);
    }

    /// Fail every move with sequence number `n` or later.
    pub fn fail_moves_from(&self, n: usize) {
        self.state().fail_moves_from = Some(n);
    }

    pub fn fail_set_up(&self, fail: bool) {
        self.state().fail_set_up = fail;
    }

    /// Fail the next alias update after the old alias was removed, the
    /// way a failing symlink leaves a real netns directory.
    pub fn fail_next_link(&self) {
        self.state().fail_next_link = true;
    }

    pub fn move_count(&self) -> usize {
        self.state().moves
    }
}

fn find<'a>(ifaces: &'a BTreeMap<String, FakeIface>, ep: &Endpoint) -> Option<&'a FakeIface> {
    ifaces.get(&ep.iface_name).or_else(|| {
        ifaces.values().find(|i| {
            let alias = i.alias.as_deref();
            alias == Some(ep.iface_name.as_str())
                || (ep.iface_alias.is_some() && alias == ep.iface_alias.as_deref())
        })
    })
}

#[async_trait]
impl NamespaceOps for FakeNamespaces {
    fn named_path(&self, name: &str) -> PathBuf {
        self.netns_dir.join(name)
    }

    async fn ensure_named(&self, name: &str) -> NetnsResult<PathBuf> {
        let path = self.named_path(name);
        self.add_namespace(path.clone());
        Ok(path)
    }

    async fn exists(&self, ns: &Path) -> bool {
        self.state().namespaces.contains_key(ns)
    }

    async fn move_endpoints(
        &self,
        from: &Path,
        to: &Path,
        endpoints: &[Endpoint],
        set_down: bool,
    ) -> MoveOutcome {
        let mut state = self.state();
        let mut outcome = MoveOutcome::default();
        if !state.namespaces.contains_key(to) {
            outcome.error = Some(NetnsError::NamespaceNotFound(to.to_path_buf()));
            return outcome;
        }

        for ep in endpoints {
            let seq = state.moves;
            state.moves += 1;
            let injected = state.fail_move_at == Some(seq)
                || state.fail_moves_from.is_some_and(|n| seq >= n);
            if injected {
                if state.fail_move_at == Some(seq) {
                    state.fail_move_at = None;
                }
                outcome.error = Some(NetnsError::Operation(format!(
                    "injected failure moving {ep}"
                )));
                return outcome;
            }

            let Some(source) = state.namespaces.get_mut(from) else {
                outcome.error = Some(NetnsError::NamespaceNotFound(from.to_path_buf()));
                return outcome;
            };
            let Some(key) = find(source, ep).map(|i| i.name.clone()) else {
                outcome.error = Some(NetnsError::LinkNotFound {
                    iface: ep.iface_name.clone(),
                    ns: from.to_path_buf(),
                });
                return outcome;
            };
            let Some(mut iface) = source.remove(&key) else {
                continue;
            };
            if set_down {
                iface.up = false;
            }
            state
                .namespaces
                .entry(to.to_path_buf())
                .or_default()
                .insert(key, iface);
            outcome.moved.push(ep.clone());
        }
        outcome
    }

    async fn set_endpoints_up(&self, ns: &Path, endpoints: &[Endpoint]) -> NetnsResult<()> {
        let mut state = self.state();
        if state.fail_set_up {
            return Err(NetnsError::Operation("injected failure setting links up".into()));
        }
        let ifaces = state
            .namespaces
            .get_mut(ns)
            .ok_or_else(|| NetnsError::NamespaceNotFound(ns.to_path_buf()))?;
        for ep in endpoints {
            let key = find(ifaces, ep)
                .map(|i| i.name.clone())
                .ok_or_else(|| NetnsError::LinkNotFound {
                    iface: ep.iface_name.clone(),
                    ns: ns.to_path_buf(),
                })?;
            if let Some(iface) = ifaces.get_mut(&key) {
                iface.up = true;
            }
        }
        Ok(())
    }

    async fn link_container_ns(&self, container: &str, ns: &Path) -> NetnsResult<()> {
        let mut state = self.state();
        state.aliases.remove(container);
        if std::mem::take(&mut state.fail_next_link) {
            return Err(NetnsError::Operation("injected failure linking namespace".into()));
        }
        state.aliases.insert(container.to_string(), ns.to_path_buf());
        Ok(())
    }
}
