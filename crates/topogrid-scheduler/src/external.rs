//! Waiting on network namespace providers outside the topology.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use topo_core::{ContainerRuntime, ContainerStatus, NodeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalWait {
    /// The node does not join an external namespace.
    NotNeeded,
    Ready,
    TimedOut,
    Cancelled,
}

/// If `cfg` joins the namespace of a container that is not one of
/// `is_topology_node`, poll `runtime` until that container runs.
///
/// A timeout is not an error: the node is handed off anyway and its own
/// deploy step reports whatever the runtime makes of it.
pub async fn wait_for_external_namespace(
    cfg: &NodeConfig,
    is_topology_node: impl Fn(&str) -> bool,
    runtime: &dyn ContainerRuntime,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ExternalWait {
    let Some(provider) = cfg.shared_namespace_ref() else {
        return ExternalWait::NotNeeded;
    };
    if is_topology_node(provider) {
        return ExternalWait::NotNeeded;
    }

    info!(node = %cfg.short_name, %provider, "waiting for external namespace provider");
    let poll = async {
        loop {
            let status = runtime.container_status(provider).await;
            if status == ContainerStatus::Running {
                return;
            }
            debug!(node = %cfg.short_name, %provider, %status, "external provider not running yet");
            tokio::time::sleep(interval).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => ExternalWait::Cancelled,
        res = tokio::time::timeout(timeout, poll) => match res {
            Ok(()) => {
                info!(node = %cfg.short_name, %provider, "external namespace provider is running");
                ExternalWait::Ready
            }
            Err(_) => {
                warn!(
                    node = %cfg.short_name,
                    %provider,
                    timeout_secs = timeout.as_secs(),
                    "external namespace provider did not start in time"
                );
                ExternalWait::TimedOut
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use topo_core::testing::FakeRuntime;

    use super::*;

    fn cfg(mode: Option<&str>) -> NodeConfig {
        NodeConfig {
            short_name: "probe".into(),
            network_mode: mode.map(str::to_string),
            ..Default::default()
        }
    }

    const FAST: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn not_needed_without_external_provider() {
        let rt = FakeRuntime::new("docker");
        let cancel = CancellationToken::new();
        let none = wait_for_external_namespace(&cfg(None), |_| false, &rt, FAST, FAST, &cancel).await;
        assert_eq!(none, ExternalWait::NotNeeded);

        let inside = wait_for_external_namespace(
            &cfg(Some("container:r1")),
            |n| n == "r1",
            &rt,
            FAST,
            FAST,
            &cancel,
        )
        .await;
        assert_eq!(inside, ExternalWait::NotNeeded);
    }

    #[tokio::test]
    async fn ready_once_provider_runs() {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let starter = {
            let rt = rt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                rt.set_status("vpn", ContainerStatus::Running);
            })
        };
        let res = wait_for_external_namespace(
            &cfg(Some("container:vpn")),
            |_| false,
            rt.as_ref(),
            FAST,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        starter.await.unwrap();
        assert_eq!(res, ExternalWait::Ready);
    }

    #[tokio::test]
    async fn times_out_when_provider_never_runs() {
        let rt = FakeRuntime::new("docker");
        let res = wait_for_external_namespace(
            &cfg(Some("container:vpn")),
            |_| false,
            &rt,
            FAST,
            Duration::from_millis(40),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(res, ExternalWait::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let rt = FakeRuntime::new("docker");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = wait_for_external_namespace(
            &cfg(Some("container:vpn")),
            |_| false,
            &rt,
            FAST,
            Duration::from_secs(60),
            &cancel,
        )
        .await;
        assert_eq!(res, ExternalWait::Cancelled);
    }
}
