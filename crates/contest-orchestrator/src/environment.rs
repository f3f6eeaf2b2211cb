//! The per-run environment descriptor.
//!
//! One [`Environment`] exists per run. It is owned by the driver and lent
//! to each phase by mutable reference; no phase keeps it beyond its call.
//! Container handles are attached at most once and consumed by teardown
//! through the `take_*` methods.

use std::fmt;
use std::path::{Path, PathBuf};

use contest_common::config::HarnessConfig;
use contest_common::error::{ContestError, Result};
use contest_common::types::{ContainerId, Expectation, NetworkName};
use contest_runtime::context::RunContext;

/// Lifecycle states of a run, in the only order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Nothing acquired yet.
    Idle,
    /// The isolated network exists.
    NetworkReady,
    /// The mock is ready and its admin endpoint is known.
    MockReady,
    /// The service-under-test accepts connections.
    ServiceReady,
    /// The contract-test runner finished and its log was captured.
    RunExecuted,
    /// The mock confirmed every message expectation.
    Verified,
    /// The mock reported unmet expectations or could not be asked.
    VerificationFailed,
    /// All acquired resources were released.
    TornDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::NetworkReady => "network-ready",
            Self::MockReady => "mock-ready",
            Self::ServiceReady => "service-ready",
            Self::RunExecuted => "run-executed",
            Self::Verified => "verified",
            Self::VerificationFailed => "verification-failed",
            Self::TornDown => "torn-down",
        };
        f.write_str(name)
    }
}

/// Ownership handle for the run's network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    name: NetworkName,
}

impl Network {
    /// Wraps a created network.
    #[must_use]
    pub const fn new(name: NetworkName) -> Self {
        Self { name }
    }

    /// Name containers use to join the network.
    #[must_use]
    pub const fn name(&self) -> &NetworkName {
        &self.name
    }
}

/// Ownership handle for a started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned identifier.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Whether the container was already stopped.
    pub stopped: bool,
}

impl ContainerHandle {
    /// Wraps a freshly started container.
    #[must_use]
    pub fn new(id: ContainerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            stopped: false,
        }
    }
}

/// Externally reachable coordinates of the mock's admin HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminEndpoint {
    /// Host address.
    pub host: String,
    /// Host-mapped port.
    pub port: u16,
}

impl AdminEndpoint {
    /// Base URL, bracketing IPv6 literals.
    #[must_use]
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for AdminEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// The running mock. The admin endpoint exists exactly when the mock does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    /// Container handle.
    pub handle: ContainerHandle,
    /// Admin API coordinates.
    pub admin: AdminEndpoint,
}

/// The running service-under-test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContainer {
    /// Container handle.
    pub handle: ContainerHandle,
    /// Image built from the build context.
    pub image: String,
    /// Port the service listens on inside the network.
    pub port: u16,
}

/// All cross-phase facts of one run.
#[derive(Debug)]
pub struct Environment {
    ctx: RunContext,
    config: HarnessConfig,
    workdir: PathBuf,
    expectations: Vec<Expectation>,
    phase: Phase,
    network: Option<Network>,
    mock: Option<MockContainer>,
    service: Option<ServiceContainer>,
    runner: Option<ContainerHandle>,
    broker_external_port: Option<u16>,
    warnings: Vec<String>,
}

impl Environment {
    /// Creates an empty environment for a run rooted at `workdir`.
    ///
    /// The run context gets the configured overall deadline, if any.
    #[must_use]
    pub fn new(config: HarnessConfig, workdir: impl Into<PathBuf>) -> Self {
        let ctx = RunContext::with_optional_timeout(config.run_timeout());
        Self::with_context(config, workdir, ctx)
    }

    /// Creates an empty environment using an existing run context.
    #[must_use]
    pub fn with_context(config: HarnessConfig, workdir: impl Into<PathBuf>, ctx: RunContext) -> Self {
        let expectations = config.expectations.clone();
        Self {
            ctx,
            config,
            workdir: workdir.into(),
            expectations,
            phase: Phase::Idle,
            network: None,
            mock: None,
            service: None,
            runner: None,
            broker_external_port: None,
            warnings: Vec::new(),
        }
    }

    /// Overrides the expected count of every expectation.
    ///
    /// Only meaningful before the mock starts.
    pub fn set_expected_message_count(&mut self, count: u32) {
        for expectation in &mut self.expectations {
            expectation.count = count;
        }
    }

    /// Run context threaded through every blocking call.
    #[must_use]
    pub const fn ctx(&self) -> &RunContext {
        &self.ctx
    }

    /// Configuration snapshot.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Directory relative paths in the configuration resolve against.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Expectations registered with the mock.
    #[must_use]
    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    /// Total number of messages expected.
    #[must_use]
    pub fn expected_message_count(&self) -> u64 {
        self.expectations.iter().map(|e| u64::from(e.count)).sum()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`. Backward or repeated transitions are ignored.
    pub fn advance(&mut self, next: Phase) {
        if next <= self.phase {
            tracing::warn!(current = %self.phase, requested = %next, "ignoring non-forward phase transition");
            return;
        }
        tracing::debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }

    /// Network handle, once provisioned.
    #[must_use]
    pub const fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// Mock handle and admin endpoint, once ready.
    #[must_use]
    pub const fn mock(&self) -> Option<&MockContainer> {
        self.mock.as_ref()
    }

    /// Service handle, once started.
    #[must_use]
    pub const fn service(&self) -> Option<&ServiceContainer> {
        self.service.as_ref()
    }

    /// Runner handle while it is held.
    #[must_use]
    pub const fn runner(&self) -> Option<&ContainerHandle> {
        self.runner.as_ref()
    }

    /// Mutable runner handle while it is held.
    pub const fn runner_mut(&mut self) -> Option<&mut ContainerHandle> {
        self.runner.as_mut()
    }

    /// Broker port discovered from the mock's startup log.
    #[must_use]
    pub const fn broker_external_port(&self) -> Option<u16> {
        self.broker_external_port
    }

    /// Records the broker port discovered from the mock's startup log.
    pub const fn set_broker_external_port(&mut self, port: u16) {
        self.broker_external_port = Some(port);
    }

    /// Soft failures recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Records a soft failure that does not abort the run.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    /// Attaches the network handle.
    ///
    /// # Errors
    ///
    /// Returns an error if a network is already attached.
    pub fn attach_network(&mut self, network: Network) -> Result<()> {
        attach(&mut self.network, network, "network")
    }

    /// Attaches the ready mock.
    ///
    /// # Errors
    ///
    /// Returns an error if a mock is already attached.
    pub fn attach_mock(&mut self, mock: MockContainer) -> Result<()> {
        attach(&mut self.mock, mock, "mock")
    }

    /// Attaches the started service.
    ///
    /// # Errors
    ///
    /// Returns an error if a service is already attached.
    pub fn attach_service(&mut self, service: ServiceContainer) -> Result<()> {
        attach(&mut self.service, service, "service")
    }

    /// Attaches the started runner.
    ///
    /// # Errors
    ///
    /// Returns an error if a runner is already attached.
    pub fn attach_runner(&mut self, runner: ContainerHandle) -> Result<()> {
        attach(&mut self.runner, runner, "runner")
    }

    /// Releases ownership of the network to teardown.
    pub const fn take_network(&mut self) -> Option<Network> {
        self.network.take()
    }

    /// Releases ownership of the mock to teardown.
    pub const fn take_mock(&mut self) -> Option<MockContainer> {
        self.mock.take()
    }

    /// Releases ownership of the service to teardown.
    pub const fn take_service(&mut self) -> Option<ServiceContainer> {
        self.service.take()
    }

    /// Releases ownership of the runner to teardown.
    pub const fn take_runner(&mut self) -> Option<ContainerHandle> {
        self.runner.take()
    }
}

fn attach<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<()> {
    if slot.is_some() {
        return Err(ContestError::runtime(
            format!("attach {what}"),
            format!("a {what} is already attached to this run"),
        ));
    }
    *slot = Some(value);
    Ok(())
}
