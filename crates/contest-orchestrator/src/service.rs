//! Service-under-test lifecycle: build, start, wait until it serves.

use contest_common::config::HarnessConfig;
use contest_common::constants::{SERVICE_CONTAINER_PREFIX, SERVICE_IMAGE_PREFIX, service_env};
use contest_common::error::{ContestError, Result};
use contest_common::types::NetworkName;
use contest_runtime::backend::ContainerBackend;
use contest_runtime::container::{BuildSpec, ContainerSpec};
use contest_runtime::logs::{LogWait, wait_for_log};

use crate::broker_port::resolve_broker_port;
use crate::environment::{ContainerHandle, Environment, Phase, ServiceContainer};

/// Describes the service container, wired to the mock by alias.
///
/// `broker_port` is the port the service should dial the broker on.
///
/// # Errors
///
/// Returns a configuration error if the container definition is incomplete.
pub fn service_spec(
    config: &HarnessConfig,
    network: &NetworkName,
    image: &str,
    broker_port: u16,
) -> Result<ContainerSpec> {
    ContainerSpec::builder(SERVICE_CONTAINER_PREFIX)
        .image(image)
        .network(network.clone())
        .alias(&config.service_alias)
        .env(service_env::DOMAIN_SERVER_PORT, config.backend_port)
        .env(service_env::DOMAIN_SERVER_HOST, &config.backend_host)
        .env(service_env::BROKER_PORT, broker_port)
        .env(service_env::BROKER_HOST, &config.broker_host)
        .build()
}

/// Builds and starts the service, blocking until it logs readiness.
///
/// The handle is attached as soon as the container exists, so teardown
/// releases it even if readiness never arrives.
///
/// # Errors
///
/// Returns an error if the build inputs are missing, the build or start
/// fails, or the service does not become ready in time.
pub async fn start_service<B: ContainerBackend>(backend: &B, env: &mut Environment) -> Result<()> {
    let config = env.config().clone();
    let network = env
        .network()
        .map(|n| n.name().clone())
        .ok_or_else(|| ContestError::runtime("start service", "no network has been provisioned"))?;
    let build = BuildSpec::new(
        env.workdir().join(&config.build_context),
        &config.dockerfile,
        SERVICE_IMAGE_PREFIX,
    );
    build.check()?;

    tracing::info!(context = %build.context.display(), tag = %build.tag, "building service image");
    let image = backend.build_image(env.ctx(), &build).await?;

    let broker_port = resolve_broker_port(env.broker_external_port(), config.broker_port);
    let spec = service_spec(&config, &network, &image, broker_port)?;
    tracing::info!(container = %spec.name, broker_port, alias = %config.service_alias, "starting service");
    let id = match backend.start(env.ctx(), &spec).await {
        Ok(id) => id,
        Err(e) => {
            let ctx = env.ctx().detached();
            if let Err(cleanup) = backend.remove_image(&ctx, &image).await {
                env.warn(format!("failed to remove service image {image}: {cleanup}"));
            }
            return Err(e);
        }
    };

    let port = config.service_port;
    let wait = LogWait::for_line(&config.markers.service_ready, config.service_startup_timeout())
        .poll_every(config.log_poll_interval());
    env.attach_service(ServiceContainer {
        handle: ContainerHandle::new(id.clone(), spec.name),
        image,
        port,
    })?;

    let startup_log = wait_for_log(backend, env.ctx(), &id, &wait).await?;
    tracing::info!(container = %id.short(), port, log_bytes = startup_log.len(), "service ready");
    env.advance(Phase::ServiceReady);
    Ok(())
}

#[cfg(test)]
mod tests {
    use contest_runtime::backend::scripted::{BackendCall, ContainerScript, ScriptedBackend};

    use super::*;
    use crate::network::provision_network;

    fn build_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").expect("dockerfile");
        dir
    }

    fn fast_config() -> HarnessConfig {
        HarnessConfig {
            log_poll_interval_ms: 1,
            service_startup_timeout_secs: 5,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn spec_injects_mock_coordinates() {
        let config = HarnessConfig::default();
        let spec = service_spec(&config, &NetworkName::new("contest-x"), "contest-sut:abc", 29092).expect("spec");
        assert_eq!(spec.env_var("DOMAIN_SERVER_HOST"), Some("order-api"));
        assert_eq!(spec.env_var("DOMAIN_SERVER_PORT"), Some("8090"));
        assert_eq!(spec.env_var("KAFKA_HOST"), Some("kafka"));
        assert_eq!(spec.env_var("KAFKA_PORT"), Some("29092"));
        assert_eq!(spec.network_aliases, vec!["service-under-test"]);
    }

    #[tokio::test]
    async fn uses_discovered_broker_port() {
        let dir = build_dir();
        let backend = ScriptedBackend::new().script("contest-sut", ContainerScript::logging(["Listening and serving HTTP on :8080"]));
        let mut env = Environment::new(fast_config(), dir.path());
        provision_network(&backend, &mut env).await.expect("network");
        env.set_broker_external_port(29092);

        start_service(&backend, &mut env).await.expect("service ready");

        let started = backend.started();
        assert_eq!(started[0].env_var("KAFKA_PORT"), Some("29092"));
        let service = env.service().expect("attached");
        assert_eq!(service.port, 8080);
        assert!(service.image.starts_with("contest-sut:"));
        assert_eq!(env.phase(), Phase::ServiceReady);
    }

    #[tokio::test]
    async fn falls_back_to_configured_broker_port() {
        let dir = build_dir();
        let backend = ScriptedBackend::new().script("contest-sut", ContainerScript::logging(["Listening and serving"]));
        let mut env = Environment::new(fast_config(), dir.path());
        provision_network(&backend, &mut env).await.expect("network");

        start_service(&backend, &mut env).await.expect("service ready");
        assert_eq!(backend.started()[0].env_var("KAFKA_PORT"), Some("9092"));
    }

    #[tokio::test]
    async fn build_failure_starts_nothing() {
        let dir = build_dir();
        let backend = ScriptedBackend::new().fail_build("go: module not found");
        let mut env = Environment::new(fast_config(), dir.path());
        provision_network(&backend, &mut env).await.expect("network");

        let err = start_service(&backend, &mut env).await.expect_err("build fails");
        assert!(err.to_string().contains("module not found"));
        assert!(backend.started().is_empty());
        assert!(env.service().is_none());
    }

    #[tokio::test]
    async fn crash_before_ready_keeps_handle_for_teardown() {
        let dir = build_dir();
        let backend = ScriptedBackend::new().script("contest-sut", ContainerScript::logging(["panic: nil map"]).exits_with(2));
        let mut env = Environment::new(fast_config(), dir.path());
        provision_network(&backend, &mut env).await.expect("network");

        let err = start_service(&backend, &mut env).await.expect_err("crashed");
        assert!(matches!(err, ContestError::ContainerExited { code: 2, .. }));
        assert!(env.service().is_some());
        assert_eq!(env.phase(), Phase::NetworkReady);
    }

    #[tokio::test]
    async fn start_failure_removes_built_image() {
        let dir = build_dir();
        let backend = ScriptedBackend::new().script("contest-sut", ContainerScript::default().fails_to_start("port in use"));
        let mut env = Environment::new(fast_config(), dir.path());
        provision_network(&backend, &mut env).await.expect("network");

        assert!(start_service(&backend, &mut env).await.is_err());
        assert!(backend.calls().iter().any(|c| matches!(c, BackendCall::RemoveImage(_))));
    }

    #[tokio::test]
    async fn missing_dockerfile_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::new();
        let mut env = Environment::new(fast_config(), dir.path());
        provision_network(&backend, &mut env).await.expect("network");

        let err = start_service(&backend, &mut env).await.expect_err("no Dockerfile");
        assert!(matches!(err, ContestError::NotFound { kind: "build file", .. }));
    }
}
