//! Mock lifecycle: start the dual-protocol mock and discover its endpoints.

use std::path::Path;

use contest_common::config::HarnessConfig;
use contest_common::constants::{
    CONTAINER_CONTRACT_PATH, MOCK_COMMAND, MOCK_CONTAINER_PREFIX, MOCK_REPORT_PATH, mock_env,
};
use contest_common::error::{ContestError, Result};
use contest_common::types::{BindMount, ContainerId, NetworkName};
use contest_runtime::backend::ContainerBackend;
use contest_runtime::container::ContainerSpec;
use contest_runtime::logs::{LogWait, wait_for_log};

use crate::broker_port::{BrokerPortPattern, extract_external_port, resolve_broker_port};
use crate::environment::{AdminEndpoint, ContainerHandle, Environment, MockContainer, Phase};
use crate::expectations::ExpectationClient;
use crate::teardown::release_container;

/// Describes the mock container.
///
/// The mock serves the HTTP stub, the broker and the admin API, and is
/// reachable inside the network under both the backend and broker aliases.
///
/// # Errors
///
/// Returns a configuration error if the container definition is incomplete.
pub fn mock_spec(
    config: &HarnessConfig,
    network: &NetworkName,
    contract: &Path,
    reports: &Path,
) -> Result<ContainerSpec> {
    ContainerSpec::builder(MOCK_CONTAINER_PREFIX)
        .image(&config.mock_image)
        .arg(MOCK_COMMAND)
        .expose(config.backend_port)
        .expose(config.broker_port)
        .expose(config.broker_admin_port)
        .network(network.clone())
        .alias(&config.backend_host)
        .alias(&config.broker_host)
        .mount(BindMount::read_only(contract, CONTAINER_CONTRACT_PATH))
        .mount(BindMount::read_write(reports, MOCK_REPORT_PATH))
        .env(mock_env::EXTERNAL_HOST, &config.broker_host)
        .env(mock_env::EXTERNAL_PORT, config.broker_port)
        .env(mock_env::API_SERVER_PORT, config.broker_admin_port)
        .build()
}

/// Starts the mock, resolves its admin endpoint, registers expectations
/// and recovers the broker's external port from its startup log.
///
/// Registration and port discovery failures are recorded as warnings on
/// `env`. If the mock never becomes ready, or its admin endpoint cannot be
/// resolved, the container is discarded and nothing is attached.
///
/// # Errors
///
/// Returns an error if the mock cannot be started, does not become ready
/// in time, or its admin endpoint cannot be resolved.
pub async fn start_mock<B: ContainerBackend>(backend: &B, env: &mut Environment) -> Result<()> {
    let config = env.config();
    let pattern = BrokerPortPattern::new(&config.markers.broker_external_port)?;
    let network = env
        .network()
        .map(|n| n.name().clone())
        .ok_or_else(|| ContestError::runtime("start mock", "no network has been provisioned"))?;
    let contract = config.contract_path(env.workdir())?;
    let reports = config.ensure_report_dir(env.workdir())?;
    let spec = mock_spec(config, &network, &contract, &reports)?;

    tracing::info!(container = %spec.name, image = %spec.image, network = %network, "starting mock");
    let id = backend.start(env.ctx(), &spec).await?;
    let handle = ContainerHandle::new(id, spec.name);

    let admin = match await_admin_endpoint(backend, env, &handle.id).await {
        Ok(admin) => admin,
        Err(e) => {
            let ctx = env.ctx().detached();
            if let Err(release) = release_container(backend, &ctx, &handle, env.config().stop_grace()).await {
                env.warn(format!("failed to discard mock {}: {release}", handle.name));
            }
            return Err(e);
        }
    };
    tracing::info!(container = %handle.name, admin = %admin, "mock ready");
    env.attach_mock(MockContainer { handle, admin: admin.clone() })?;

    register_expectations(env, &admin).await;
    discover_broker_port(backend, env, &pattern).await;

    env.advance(Phase::MockReady);
    Ok(())
}

async fn await_admin_endpoint<B: ContainerBackend>(
    backend: &B,
    env: &Environment,
    id: &ContainerId,
) -> Result<AdminEndpoint> {
    let config = env.config();
    let wait = LogWait::for_line(&config.markers.mock_ready, config.mock_startup_timeout())
        .poll_every(config.log_poll_interval());
    let startup_log = wait_for_log(backend, env.ctx(), id, &wait).await?;
    tracing::debug!(container = %id.short(), bytes = startup_log.len(), "mock readiness marker seen");
    let port = backend.mapped_port(env.ctx(), id, config.broker_admin_port).await?;
    let host = backend.host(env.ctx(), id).await?;
    Ok(AdminEndpoint { host, port })
}

async fn register_expectations(env: &mut Environment, admin: &AdminEndpoint) {
    let result = match ExpectationClient::new(admin.base_url(), env.config().http_timeout()) {
        Ok(client) => client.register(env.ctx(), env.expectations()).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => tracing::info!(
            expected = env.expected_message_count(),
            channels = env.expectations().len(),
            "expectations registered"
        ),
        Err(e) => env.warn(format!("failed to register expectations: {e}")),
    }
}

async fn discover_broker_port<B: ContainerBackend>(
    backend: &B,
    env: &mut Environment,
    pattern: &BrokerPortPattern,
) {
    let Some(id) = env.mock().map(|m| m.handle.id.clone()) else {
        return;
    };
    let fallback = env.config().broker_port;
    match backend.logs(env.ctx(), &id).await {
        Ok(text) => {
            tracing::debug!(container = %id.short(), "mock startup log:\n{text}");
            match extract_external_port(pattern, &text) {
                Some(port) => {
                    tracing::info!(port, "broker external listener port discovered");
                    env.set_broker_external_port(port);
                }
                None => env.warn(format!(
                    "broker external port not found in mock log (pattern /{}/), using {}",
                    pattern.as_str(),
                    resolve_broker_port(None, fallback)
                )),
            }
        }
        Err(e) => env.warn(format!("failed to read mock startup log: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use contest_runtime::backend::scripted::{BackendCall, ContainerScript, ScriptedBackend};

    use super::*;
    use crate::network::provision_network;

    const READY: &str = "AsyncMock has started";
    const LISTENER: &str = "listeners: EXTERNAL://0.0.0.0:29092";

    fn workdir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("specmatic.yaml"), "version: 2\n").expect("contract");
        dir
    }

    fn fast_config() -> HarnessConfig {
        HarnessConfig {
            log_poll_interval_ms: 1,
            mock_startup_timeout_secs: 5,
            http_timeout_secs: 1,
            ..HarnessConfig::default()
        }
    }

    async fn ready_env(backend: &ScriptedBackend, dir: &Path) -> Environment {
        let mut env = Environment::new(fast_config(), dir);
        provision_network(backend, &mut env).await.expect("network");
        env
    }

    #[test]
    fn spec_wires_ports_aliases_mounts_and_env() {
        let config = HarnessConfig::default();
        let spec = mock_spec(
            &config,
            &NetworkName::new("contest-x"),
            Path::new("/w/specmatic.yaml"),
            Path::new("/w/build/reports"),
        )
        .expect("spec");
        assert_eq!(spec.command, vec!["mock"]);
        assert_eq!(spec.exposed_ports, vec![8090, 9092, 9999]);
        assert_eq!(spec.network_aliases, vec!["order-api", "kafka"]);
        assert_eq!(spec.env_var("KAFKA_EXTERNAL_HOST"), Some("kafka"));
        assert_eq!(spec.env_var("KAFKA_EXTERNAL_PORT"), Some("9092"));
        assert_eq!(spec.env_var("API_SERVER_PORT"), Some("9999"));
        assert!(spec.mounts[0].read_only);
        assert_eq!(spec.mounts[0].container, CONTAINER_CONTRACT_PATH);
        assert_eq!(spec.mounts[1].container, MOCK_REPORT_PATH);
    }

    #[tokio::test]
    async fn ready_mock_records_endpoint_and_broker_port() {
        let dir = workdir();
        let backend = ScriptedBackend::new()
            .with_fixed_port(9999, 1)
            .script("contest-mock", ContainerScript::logging(["boot", LISTENER, READY]));
        let mut env = ready_env(&backend, dir.path()).await;

        start_mock(&backend, &mut env).await.expect("mock starts");

        let mock = env.mock().expect("attached");
        assert_eq!(mock.admin.host, "127.0.0.1");
        assert_eq!(mock.admin.port, 1);
        assert_eq!(env.broker_external_port(), Some(29092));
        assert_eq!(env.phase(), Phase::MockReady);
        // Port 1 refuses connections, so registration is only a warning.
        assert!(env.warnings().iter().any(|w| w.contains("register expectations")));
        assert!(dir.path().join("build/reports").is_dir());
    }

    #[tokio::test]
    async fn missing_listener_line_keeps_port_undefined() {
        let dir = workdir();
        let backend = ScriptedBackend::new()
            .with_fixed_port(9999, 1)
            .script("contest-mock", ContainerScript::logging([READY]));
        let mut env = ready_env(&backend, dir.path()).await;

        start_mock(&backend, &mut env).await.expect("soft failure only");
        assert_eq!(env.broker_external_port(), None);
        assert!(env.warnings().iter().any(|w| w.contains("using 9092")));
    }

    #[tokio::test]
    async fn readiness_failure_discards_container() {
        let dir = workdir();
        let backend = ScriptedBackend::new()
            .script("contest-mock", ContainerScript::logging(["license expired"]).exits_with(1));
        let mut env = ready_env(&backend, dir.path()).await;

        let err = start_mock(&backend, &mut env).await.expect_err("fatal");
        assert!(matches!(err, ContestError::ContainerExited { code: 1, .. }));
        assert!(env.mock().is_none());
        assert!(backend.calls().iter().any(|c| matches!(c, BackendCall::Remove(_))));
    }

    #[tokio::test]
    async fn missing_contract_file_fails_before_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::new();
        let mut env = ready_env(&backend, dir.path()).await;

        let err = start_mock(&backend, &mut env).await.expect_err("no contract");
        assert!(matches!(err, ContestError::NotFound { kind: "contract file", .. }));
        assert!(backend.started().is_empty());
    }

    #[tokio::test]
    async fn mock_requires_network() {
        let dir = workdir();
        let backend = ScriptedBackend::new();
        let mut env = Environment::new(fast_config(), dir.path());
        assert!(start_mock(&backend, &mut env).await.is_err());
    }
}
