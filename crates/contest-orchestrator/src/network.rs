//! Per-run network provisioning.

use contest_common::constants::NETWORK_PREFIX;
use contest_common::error::Result;
use contest_common::types::NetworkName;
use contest_runtime::backend::ContainerBackend;
use contest_runtime::context::RunContext;

use crate::environment::{Environment, Network, Phase};

/// Creates a uniquely named network and attaches it to `env`.
///
/// # Errors
///
/// Returns an error if the runtime cannot allocate the network. There is
/// no fallback to a shared network.
pub async fn provision_network<B: ContainerBackend>(backend: &B, env: &mut Environment) -> Result<()> {
    let name = NetworkName::generate(NETWORK_PREFIX);
    backend.create_network(env.ctx(), &name).await?;
    tracing::info!(network = %name, "network created");
    env.attach_network(Network::new(name))?;
    env.advance(Phase::NetworkReady);
    Ok(())
}

/// Removes the run's network. Failures are returned for the caller to log.
///
/// # Errors
///
/// Returns an error if the runtime refuses to remove the network.
pub async fn release_network<B: ContainerBackend>(
    backend: &B,
    ctx: &RunContext,
    network: Network,
) -> Result<()> {
    backend.remove_network(ctx, network.name()).await?;
    tracing::debug!(network = %network.name(), "network removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use contest_common::config::HarnessConfig;
    use contest_runtime::backend::scripted::ScriptedBackend;

    use super::*;

    #[tokio::test]
    async fn provisions_unique_network_per_run() {
        let backend = ScriptedBackend::new();
        let mut first = Environment::new(HarnessConfig::default(), ".");
        let mut second = Environment::new(HarnessConfig::default(), ".");
        provision_network(&backend, &mut first).await.expect("first");
        provision_network(&backend, &mut second).await.expect("second");

        let a = first.network().expect("network").name().clone();
        let b = second.network().expect("network").name().clone();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("contest-"));
        assert_eq!(first.phase(), Phase::NetworkReady);
    }

    #[tokio::test]
    async fn allocation_failure_is_returned() {
        let backend = ScriptedBackend::new().fail_network("address pools exhausted");
        let mut env = Environment::new(HarnessConfig::default(), ".");
        let err = provision_network(&backend, &mut env).await.expect_err("fails");
        assert!(err.to_string().contains("address pools exhausted"));
        assert!(env.network().is_none());
        assert_eq!(env.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn release_removes_network() {
        let backend = ScriptedBackend::new();
        let mut env = Environment::new(HarnessConfig::default(), ".");
        provision_network(&backend, &mut env).await.expect("network");
        let network = env.take_network().expect("held");
        release_network(&backend, &RunContext::new(), network).await.expect("removed");
        assert!(backend.networks().is_empty());
    }
}
