//! Contract-test runner lifecycle.
//!
//! The runner's log is the primary artifact. It is captured and returned
//! whatever the runner's exit code; only failing to start or read from the
//! runner is an error.

use std::path::Path;

use contest_common::config::HarnessConfig;
use contest_common::constants::{
    CONTAINER_CONTRACT_PATH, RUNNER_COMMAND, RUNNER_CONTAINER_PREFIX, RUNNER_LOG_FILE, RUNNER_REPORT_PATH,
    runner_env,
};
use contest_common::error::{ContestError, Result};
use contest_common::types::{BindMount, ContainerState, NetworkName};
use contest_runtime::backend::ContainerBackend;
use contest_runtime::container::ContainerSpec;
use contest_runtime::logs::{LogWait, wait_for_log};
use serde::Serialize;

use crate::environment::{ContainerHandle, Environment, Phase};

/// What the runner produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerOutcome {
    /// Full captured log text.
    pub log: String,
    /// Exit code, if the runner exited on its own before being stopped.
    pub exit_code: Option<i64>,
    /// Whether the runner was still running and had to be stopped.
    pub stopped_by_harness: bool,
    /// Whether the results summary marker appeared.
    pub summary_seen: bool,
}

impl RunnerOutcome {
    /// Whether the runner got far enough to report results.
    #[must_use]
    pub const fn is_conclusive(&self) -> bool {
        self.summary_seen || matches!(self.exit_code, Some(0))
    }
}

/// Base URL the runner uses to reach the service by alias.
#[must_use]
pub fn app_url(alias: &str, port: u16) -> String {
    format!("http://{alias}:{port}")
}

/// Describes the runner container.
///
/// # Errors
///
/// Returns a configuration error if the container definition is incomplete.
pub fn runner_spec(
    config: &HarnessConfig,
    network: &NetworkName,
    service_port: u16,
    contract: &Path,
    reports: &Path,
) -> Result<ContainerSpec> {
    ContainerSpec::builder(RUNNER_CONTAINER_PREFIX)
        .image(&config.runner_image)
        .arg(RUNNER_COMMAND)
        .network(network.clone())
        .env(runner_env::GENERATIVE_TESTS, "true")
        .env(runner_env::FILTER, &config.runner_filter)
        .env(runner_env::APP_URL, app_url(&config.service_alias, service_port))
        .mount(BindMount::read_only(contract, CONTAINER_CONTRACT_PATH))
        .mount(BindMount::read_write(reports, RUNNER_REPORT_PATH))
        .build()
}

/// Runs the contract tests against the ready service and returns the log.
///
/// Waits for the results summary, captures the full log, writes it to the
/// report directory and stops the runner with the configured grace period
/// so it can finish writing its reports.
///
/// # Errors
///
/// Returns an error if the service is not running, the runner cannot be
/// started, its log cannot be read, or the run is interrupted.
pub async fn run_tests<B: ContainerBackend>(backend: &B, env: &mut Environment) -> Result<RunnerOutcome> {
    let config = env.config().clone();
    let network = env
        .network()
        .map(|n| n.name().clone())
        .ok_or_else(|| ContestError::runtime("start runner", "no network has been provisioned"))?;
    let service_port = env
        .service()
        .map(|s| s.port)
        .ok_or_else(|| ContestError::runtime("start runner", "the service is not running"))?;
    let contract = config.contract_path(env.workdir())?;
    let reports = config.ensure_report_dir(env.workdir())?;
    let spec = runner_spec(&config, &network, service_port, &contract, &reports)?;

    tracing::info!(
        container = %spec.name,
        app_url = spec.env_var(runner_env::APP_URL).unwrap_or_default(),
        "starting contract tests"
    );
    let id = backend.start(env.ctx(), &spec).await?;
    env.attach_runner(ContainerHandle::new(id.clone(), spec.name))?;

    let wait = LogWait::for_line(&config.markers.runner_complete, config.runner_timeout())
        .poll_every(config.log_poll_interval());
    let summary_seen = match wait_for_log(backend, env.ctx(), &id, &wait).await {
        Ok(_) => true,
        Err(e @ (ContestError::ContainerExited { .. } | ContestError::Timeout { .. })) => {
            env.warn(format!("contract tests did not report a summary: {e}"));
            false
        }
        Err(e) => return Err(e),
    };

    let log = backend.logs(env.ctx(), &id).await?;

    // Inspect before stopping: a stop makes any process report a signal exit.
    let exit_code = match backend.state(env.ctx(), &id).await {
        Ok(ContainerState::Exited { code }) => Some(code),
        Ok(_) => None,
        Err(e) => {
            env.warn(format!("failed to inspect runner: {e}"));
            None
        }
    };

    let stopped_by_harness = match backend.stop(env.ctx(), &id, config.runner_stop_grace()).await {
        Ok(()) => {
            if let Some(runner) = env.runner_mut() {
                runner.stopped = true;
            }
            exit_code.is_none()
        }
        Err(e) => {
            env.warn(format!("failed to stop runner: {e}"));
            false
        }
    };

    let log_path = reports.join(RUNNER_LOG_FILE);
    if let Err(e) = tokio::fs::write(&log_path, &log).await {
        env.warn(format!("failed to write {}: {e}", log_path.display()));
    }

    tracing::info!(
        summary_seen,
        exit_code = ?exit_code,
        stopped_by_harness,
        bytes = log.len(),
        "contract tests finished"
    );
    env.advance(Phase::RunExecuted);
    Ok(RunnerOutcome {
        log,
        exit_code,
        stopped_by_harness,
        summary_seen,
    })
}
