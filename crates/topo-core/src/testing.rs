//! In-memory node and runtime doubles for tests.
//!
//! [`FakeNode`] records every capability call into a shared [`EventLog`]
//! as `"<node>:<step>"`, so tests can assert cross-node ordering.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::exec::{ExecCmd, ExecResult};
use crate::node::{ContainerRuntime, DeployParams, Node, PullPolicy};
use crate::types::{ContainerStatus, Endpoint, GenericContainer, NodeConfig, Stages};

/// Shared, ordered record of calls.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Position of the first occurrence of `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.position(event).is_some()
    }
}

/// Tracks how many nodes are inside `deploy` at once.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Runtime double keeping container status in memory.
pub struct FakeRuntime {
    name: String,
    concurrent: bool,
    statuses: Mutex<HashMap<String, ContainerStatus>>,
    calls: Mutex<Vec<String>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    stop_error_after_stopping: AtomicBool,
}

impl FakeRuntime {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            concurrent: true,
            statuses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            stop_error_after_stopping: AtomicBool::new(false),
        }
    }

    /// A backend that cannot provision two nodes at once.
    pub fn serial(name: &str) -> Self {
        Self {
            concurrent: false,
            ..Self::new(name)
        }
    }

    pub fn set_status(&self, container: &str, status: ContainerStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(container.to_string(), status);
    }

    pub fn status_of(&self, container: &str) -> ContainerStatus {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(container)
            .copied()
            .unwrap_or(ContainerStatus::NotFound)
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Make `stop_container` report an error even though the container stops.
    pub fn stop_error_after_stopping(&self, enabled: bool) {
        self.stop_error_after_stopping.store(enabled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn concurrent_provisioning(&self) -> bool {
        self.concurrent
    }

    async fn container_status(&self, container: &str) -> ContainerStatus {
        self.status_of(container)
    }

    async fn start_container(&self, container: &str) -> anyhow::Result<()> {
        self.record(format!("start {container}"));
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("start of {container} refused");
        }
        self.set_status(container, ContainerStatus::Running);
        Ok(())
    }

    async fn stop_container(&self, container: &str) -> anyhow::Result<()> {
        self.record(format!("stop {container}"));
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("stop of {container} refused");
        }
        self.set_status(container, ContainerStatus::Stopped);
        if self.stop_error_after_stopping.load(Ordering::SeqCst) {
            anyhow::bail!("stop of {container} timed out");
        }
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> anyhow::Result<()> {
        self.record(format!("delete {container}"));
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(container);
        Ok(())
    }

    async fn pull_image(&self, image: &str, _policy: PullPolicy) -> anyhow::Result<()> {
        self.record(format!("pull {image}"));
        Ok(())
    }

    async fn create_network(&self) -> anyhow::Result<()> {
        self.record("create-network".to_string());
        Ok(())
    }

    async fn delete_network(&self) -> anyhow::Result<()> {
        self.record("delete-network".to_string());
        Ok(())
    }
}

/// Node double driven entirely from memory.
pub struct FakeNode {
    cfg: NodeConfig,
    runtime: Arc<FakeRuntime>,
    events: Arc<EventLog>,
    probe: Option<Arc<ConcurrencyProbe>>,
    endpoints: Mutex<Vec<Endpoint>>,
    labels: BTreeMap<String, String>,
    ns_path: Mutex<PathBuf>,
    fail_at: Mutex<Option<String>>,
    deploy_delay: Duration,
    healthy_after: AtomicUsize,
    exits: bool,
}

impl FakeNode {
    pub fn new(name: &str, lab: &str, runtime: Arc<FakeRuntime>) -> Self {
        let long_name = format!("clab-{lab}-{name}");
        Self {
            ns_path: Mutex::new(PathBuf::from(format!("/proc/fake/{long_name}/ns/net"))),
            cfg: NodeConfig {
                short_name: name.to_string(),
                long_name,
                kind: "linux".to_string(),
                image: "alpine:3".to_string(),
                runtime: runtime.name().to_string(),
                ..Default::default()
            },
            runtime,
            events: EventLog::new(),
            probe: None,
            endpoints: Mutex::new(Vec::new()),
            labels: BTreeMap::new(),
            fail_at: Mutex::new(None),
            deploy_delay: Duration::ZERO,
            healthy_after: AtomicUsize::new(0),
            exits: false,
        }
    }

    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_mgmt_ipv4(mut self, ip: &str) -> Self {
        self.cfg.mgmt_ipv4 = Some(ip.to_string());
        self
    }

    pub fn with_network_mode(mut self, mode: &str) -> Self {
        self.cfg.network_mode = Some(mode.to_string());
        self
    }

    pub fn with_stages(mut self, stages: Stages) -> Self {
        self.cfg.stages = stages;
        self
    }

    pub fn with_exec(mut self, commands: &[&str]) -> Self {
        self.cfg.exec = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.cfg.image = image.to_string();
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_endpoints(self, endpoints: Vec<Endpoint>) -> Self {
        *self.endpoints.lock().unwrap_or_else(|e| e.into_inner()) = endpoints;
        self
    }

    pub fn with_config(mut self, f: impl FnOnce(&mut NodeConfig)) -> Self {
        f(&mut self.cfg);
        self
    }

    pub fn with_deploy_delay(mut self, delay: Duration) -> Self {
        self.deploy_delay = delay;
        self
    }

    /// Report unhealthy for the first `polls` health checks.
    pub fn healthy_after(self, polls: usize) -> Self {
        self.healthy_after.store(polls, Ordering::SeqCst);
        self
    }

    /// Container stops on its own right after deploy.
    pub fn exits_after_deploy(mut self) -> Self {
        self.exits = true;
        self
    }

    /// Fail the named step (`pre-deploy`, `deploy`, `deploy-endpoints`,
    /// `runtime-info`, `post-deploy`, `healthy`, `ns-path`).
    pub fn failing_at(self, step: &str) -> Self {
        self.set_failing_at(Some(step));
        self
    }

    pub fn set_failing_at(&self, step: Option<&str>) {
        *self.fail_at.lock().unwrap_or_else(|e| e.into_inner()) = step.map(str::to_string);
    }

    pub fn set_ns_path(&self, path: PathBuf) {
        *self.ns_path.lock().unwrap_or_else(|e| e.into_inner()) = path;
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn fake_runtime(&self) -> &Arc<FakeRuntime> {
        &self.runtime
    }

    fn step(&self, step: &str) -> anyhow::Result<()> {
        self.events.push(format!("{}:{}", self.cfg.short_name, step));
        let failing = self.fail_at.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if failing.as_deref() == Some(step) {
            anyhow::bail!("{} failed at {}", self.cfg.short_name, step);
        }
        Ok(())
    }
}

#[async_trait]
impl Node for FakeNode {
    fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    async fn pre_deploy(&self, _params: &DeployParams) -> anyhow::Result<()> {
        self.step("pre-deploy")
    }

    async fn deploy(&self, _params: &DeployParams) -> anyhow::Result<()> {
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if !self.deploy_delay.is_zero() {
            tokio::time::sleep(self.deploy_delay).await;
        }
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        self.step("deploy")?;
        let status = if self.exits {
            ContainerStatus::Stopped
        } else {
            ContainerStatus::Running
        };
        self.runtime.set_status(&self.cfg.long_name, status);
        Ok(())
    }

    async fn deploy_endpoints(&self) -> anyhow::Result<()> {
        self.step("deploy-endpoints")
    }

    async fn update_config_with_runtime_info(&self) -> anyhow::Result<()> {
        self.step("runtime-info")
    }

    async fn post_deploy(&self, _params: &DeployParams) -> anyhow::Result<()> {
        self.step("post-deploy")
    }

    async fn run_exec(&self, cmd: &ExecCmd) -> anyhow::Result<ExecResult> {
        self.events
            .push(format!("{}:exec {}", self.cfg.short_name, cmd.command_string()));
        let mut result = ExecResult::new(cmd);
        result.stdout = "ok".to_string();
        Ok(result)
    }

    async fn is_healthy(&self) -> anyhow::Result<bool> {
        self.step("healthy")?;
        let remaining = self.healthy_after.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(true);
        }
        self.healthy_after.store(remaining - 1, Ordering::SeqCst);
        Ok(false)
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn ns_path(&self) -> anyhow::Result<PathBuf> {
        self.step("ns-path")?;
        Ok(self.ns_path.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn containers(&self) -> anyhow::Result<Vec<GenericContainer>> {
        Ok(vec![GenericContainer {
            id: format!("id-{}", self.cfg.short_name),
            names: vec![self.cfg.long_name.clone()],
            labels: self.labels.clone(),
            status: self.runtime.status_of(&self.cfg.long_name),
        }])
    }

    async fn delete(&self) -> anyhow::Result<()> {
        self.runtime.delete_container(&self.cfg.long_name).await
    }
}
