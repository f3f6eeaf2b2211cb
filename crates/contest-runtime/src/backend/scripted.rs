//! In-memory backend with scripted container behavior.
//!
//! Records every call so orchestration can be asserted on without a
//! container daemon. Containers are matched to scripts by name prefix.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contest_common::error::{ContestError, Result};
use contest_common::types::{ContainerId, ContainerState, NetworkName};

use super::ContainerBackend;
use crate::container::{BuildSpec, ContainerSpec};
use crate::context::RunContext;

/// Host every published port is reachable on.
const HOST: &str = "127.0.0.1";

/// First host port handed out for published container ports.
const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// A call observed by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `create_network`
    CreateNetwork(NetworkName),
    /// `remove_network`
    RemoveNetwork(NetworkName),
    /// `build_image`
    BuildImage(BuildSpec),
    /// `remove_image`
    RemoveImage(String),
    /// `start`
    Start(ContainerSpec),
    /// `mapped_port`
    MappedPort(ContainerId, u16),
    /// `host`
    Host(ContainerId),
    /// `logs`
    Logs(ContainerId),
    /// `state`
    State(ContainerId),
    /// `stop`
    Stop(ContainerId, Duration),
    /// `remove`
    Remove(ContainerId),
}

/// Scripted behavior for containers whose name starts with a prefix.
#[derive(Clone, Default)]
pub struct ContainerScript {
    logs: Vec<String>,
    ready_after_polls: usize,
    exit_code: Option<i64>,
    start_error: Option<String>,
    logs_error: Option<String>,
    stop_error: Option<String>,
    on_start: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl fmt::Debug for ContainerScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerScript")
            .field("logs", &self.logs)
            .field("ready_after_polls", &self.ready_after_polls)
            .field("exit_code", &self.exit_code)
            .field("start_error", &self.start_error)
            .field("logs_error", &self.logs_error)
            .field("stop_error", &self.stop_error)
            .field("on_start", &self.on_start.is_some())
            .finish()
    }
}

impl ContainerScript {
    /// A running container that has logged `lines`.
    #[must_use]
    pub fn logging<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            logs: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Logs stay empty until they have been read `polls` times.
    #[must_use]
    pub const fn ready_after_polls(mut self, polls: usize) -> Self {
        self.ready_after_polls = polls;
        self
    }

    /// The container's process has already exited with `code`.
    #[must_use]
    pub const fn exits_with(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Starting the container fails with `message`.
    #[must_use]
    pub fn fails_to_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Reading the container's logs fails with `message`.
    #[must_use]
    pub fn logs_unreadable(mut self, message: impl Into<String>) -> Self {
        self.logs_error = Some(message.into());
        self
    }

    /// Stopping the container fails with `message`.
    #[must_use]
    pub fn fails_to_stop(mut self, message: impl Into<String>) -> Self {
        self.stop_error = Some(message.into());
        self
    }

    /// Runs `hook` after the container starts.
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }
}

#[derive(Debug)]
struct ScriptedContainer {
    spec: ContainerSpec,
    script: ContainerScript,
    polls: usize,
    stopped: bool,
    ports: HashMap<u16, u16>,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<BackendCall>,
    containers: HashMap<ContainerId, ScriptedContainer>,
    networks: Vec<NetworkName>,
    next_id: u64,
    next_port: u16,
}

/// In-memory [`ContainerBackend`].
#[derive(Debug)]
pub struct ScriptedBackend {
    network_error: Option<String>,
    build_error: Option<String>,
    scripts: Vec<(String, ContainerScript)>,
    fixed_ports: HashMap<u16, u16>,
    inner: Mutex<Inner>,
}

impl ScriptedBackend {
    /// Creates a backend where every container starts and logs nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            network_error: None,
            build_error: None,
            scripts: Vec::new(),
            fixed_ports: HashMap::new(),
            inner: Mutex::new(Inner {
                next_port: FIRST_EPHEMERAL_PORT,
                ..Inner::default()
            }),
        }
    }

    /// Scripts containers whose name starts with `prefix`.
    #[must_use]
    pub fn script(mut self, prefix: impl Into<String>, script: ContainerScript) -> Self {
        self.scripts.push((prefix.into(), script));
        self
    }

    /// Publishes `container_port` on `host_port` instead of an ephemeral port.
    #[must_use]
    pub fn with_fixed_port(mut self, container_port: u16, host_port: u16) -> Self {
        let _ = self.fixed_ports.insert(container_port, host_port);
        self
    }

    /// Network creation fails with `message`.
    #[must_use]
    pub fn fail_network(mut self, message: impl Into<String>) -> Self {
        self.network_error = Some(message.into());
        self
    }

    /// Image builds fail with `message`.
    #[must_use]
    pub fn fail_build(mut self, message: impl Into<String>) -> Self {
        self.build_error = Some(message.into());
        self
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Specs of every container started so far, in order.
    #[must_use]
    pub fn started(&self) -> Vec<ContainerSpec> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Start(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    /// Networks currently present.
    #[must_use]
    pub fn networks(&self) -> Vec<NetworkName> {
        self.lock().networks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: BackendCall) {
        self.lock().calls.push(call);
    }

    fn script_for(&self, name: &str) -> ContainerScript {
        self.scripts
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_default()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_ctx(ctx: &RunContext, what: &str) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(ContestError::Cancelled { what: what.to_string() });
    }
    if ctx.is_expired() {
        return Err(ContestError::DeadlineExceeded { what: what.to_string() });
    }
    Ok(())
}

fn unknown(id: &ContainerId) -> ContestError {
    ContestError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

impl ContainerBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn create_network(&self, ctx: &RunContext, name: &NetworkName) -> Result<()> {
        self.record(BackendCall::CreateNetwork(name.clone()));
        check_ctx(ctx, "create network")?;
        if let Some(message) = &self.network_error {
            return Err(ContestError::runtime("create network", message.clone()));
        }
        self.lock().networks.push(name.clone());
        Ok(())
    }

    async fn remove_network(&self, ctx: &RunContext, name: &NetworkName) -> Result<()> {
        self.record(BackendCall::RemoveNetwork(name.clone()));
        check_ctx(ctx, "remove network")?;
        let mut inner = self.lock();
        let before = inner.networks.len();
        inner.networks.retain(|n| n != name);
        if inner.networks.len() == before {
            return Err(ContestError::NotFound {
                kind: "network",
                id: name.to_string(),
            });
        }
        Ok(())
    }

    async fn build_image(&self, ctx: &RunContext, build: &BuildSpec) -> Result<String> {
        self.record(BackendCall::BuildImage(build.clone()));
        check_ctx(ctx, "build image")?;
        match &self.build_error {
            Some(message) => Err(ContestError::runtime("build image", message.clone())),
            None => Ok(build.tag.clone()),
        }
    }

    async fn remove_image(&self, ctx: &RunContext, image: &str) -> Result<()> {
        self.record(BackendCall::RemoveImage(image.to_string()));
        check_ctx(ctx, "remove image")
    }

    async fn start(&self, ctx: &RunContext, spec: &ContainerSpec) -> Result<ContainerId> {
        self.record(BackendCall::Start(spec.clone()));
        check_ctx(ctx, "start container")?;
        let script = self.script_for(&spec.name);
        if let Some(message) = &script.start_error {
            return Err(ContestError::runtime("start container", message.clone()));
        }
        if let Some(network) = &spec.network {
            if !self.lock().networks.contains(network) {
                return Err(ContestError::NotFound {
                    kind: "network",
                    id: network.to_string(),
                });
            }
        }

        let hook = script.on_start.clone();
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = ContainerId::new(format!("scripted{:04}", inner.next_id));
            let _ = inner.containers.insert(
                id.clone(),
                ScriptedContainer {
                    spec: spec.clone(),
                    script,
                    polls: 0,
                    stopped: false,
                    ports: HashMap::new(),
                },
            );
            id
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(id)
    }

    async fn mapped_port(&self, ctx: &RunContext, id: &ContainerId, container_port: u16) -> Result<u16> {
        self.record(BackendCall::MappedPort(id.clone(), container_port));
        check_ctx(ctx, "resolve mapped port")?;
        let fixed = self.fixed_ports.get(&container_port).copied();
        let mut inner = self.lock();
        let Inner {
            containers,
            next_port,
            ..
        } = &mut *inner;
        let container = containers.get_mut(id).ok_or_else(|| unknown(id))?;
        if !container.spec.exposed_ports.contains(&container_port) {
            return Err(ContestError::NotFound {
                kind: "port mapping",
                id: format!("{}:{container_port}", id.short()),
            });
        }
        let port = *container.ports.entry(container_port).or_insert_with(|| {
            fixed.unwrap_or_else(|| {
                let port = *next_port;
                *next_port = next_port.wrapping_add(1);
                port
            })
        });
        Ok(port)
    }

    async fn host(&self, ctx: &RunContext, id: &ContainerId) -> Result<String> {
        self.record(BackendCall::Host(id.clone()));
        check_ctx(ctx, "resolve host")?;
        if !self.lock().containers.contains_key(id) {
            return Err(unknown(id));
        }
        Ok(HOST.to_string())
    }

    async fn logs(&self, ctx: &RunContext, id: &ContainerId) -> Result<String> {
        self.record(BackendCall::Logs(id.clone()));
        check_ctx(ctx, "read container logs")?;
        let mut inner = self.lock();
        let container = inner.containers.get_mut(id).ok_or_else(|| unknown(id))?;
        if let Some(message) = &container.script.logs_error {
            return Err(ContestError::runtime("read container logs", message.clone()));
        }
        container.polls += 1;
        if container.polls <= container.script.ready_after_polls {
            return Ok(String::new());
        }
        let mut text = container.script.logs.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        Ok(text)
    }

    async fn state(&self, ctx: &RunContext, id: &ContainerId) -> Result<ContainerState> {
        self.record(BackendCall::State(id.clone()));
        check_ctx(ctx, "inspect container")?;
        let inner = self.lock();
        let container = inner.containers.get(id).ok_or_else(|| unknown(id))?;
        Ok(match container.script.exit_code {
            Some(code) => ContainerState::Exited { code },
            None if container.stopped => ContainerState::Exited { code: 143 },
            None => ContainerState::Running,
        })
    }

    async fn stop(&self, ctx: &RunContext, id: &ContainerId, grace: Duration) -> Result<()> {
        self.record(BackendCall::Stop(id.clone(), grace));
        check_ctx(ctx, "stop container")?;
        let mut inner = self.lock();
        let container = inner.containers.get_mut(id).ok_or_else(|| unknown(id))?;
        if let Some(message) = &container.script.stop_error {
            return Err(ContestError::runtime("stop container", message.clone()));
        }
        container.stopped = true;
        Ok(())
    }

    async fn remove(&self, ctx: &RunContext, id: &ContainerId) -> Result<()> {
        self.record(BackendCall::Remove(id.clone()));
        check_ctx(ctx, "remove container")?;
        self.lock()
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| unknown(id))
    }
}
