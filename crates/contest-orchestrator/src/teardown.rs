//! Best-effort release of acquired containers.

use std::time::Duration;

use contest_common::error::Result;
use contest_runtime::backend::ContainerBackend;
use contest_runtime::context::RunContext;

use crate::environment::ContainerHandle;

/// Stops `handle` unless already stopped, then removes it.
///
/// Removal is attempted even if stopping failed.
///
/// # Errors
///
/// Returns the first failure; both steps are always attempted.
pub async fn release_container<B: ContainerBackend>(
    backend: &B,
    ctx: &RunContext,
    handle: &ContainerHandle,
    grace: Duration,
) -> Result<()> {
    let stopped = if handle.stopped {
        Ok(())
    } else {
        backend.stop(ctx, &handle.id, grace).await
    };
    if let Err(e) = &stopped {
        tracing::warn!(container = %handle.name, error = %e, "stop failed, removing anyway");
    }
    let removed = backend.remove(ctx, &handle.id).await;
    tracing::debug!(container = %handle.name, removed = removed.is_ok(), "container released");
    stopped.and(removed)
}

#[cfg(test)]
mod tests {
    use contest_common::types::NetworkName;
    use contest_runtime::backend::scripted::{BackendCall, ContainerScript, ScriptedBackend};
    use contest_runtime::container::ContainerSpec;

    use super::*;

    async fn started(backend: &ScriptedBackend, prefix: &str) -> ContainerHandle {
        let ctx = RunContext::new();
        let net = NetworkName::new("n");
        if backend.networks().is_empty() {
            backend.create_network(&ctx, &net).await.expect("network");
        }
        let spec = ContainerSpec::builder(prefix)
            .image("img")
            .network(net)
            .build()
            .expect("spec");
        let id = backend.start(&ctx, &spec).await.expect("start");
        ContainerHandle::new(id, spec.name)
    }

    #[tokio::test]
    async fn removes_even_when_stop_fails() {
        let backend = ScriptedBackend::new().script("stuck", ContainerScript::default().fails_to_stop("device busy"));
        let handle = started(&backend, "stuck").await;
        let err = release_container(&backend, &RunContext::new(), &handle, Duration::from_secs(1))
            .await
            .expect_err("stop failure surfaces");
        assert!(err.to_string().contains("device busy"));
        assert!(backend.calls().contains(&BackendCall::Remove(handle.id.clone())));
    }

    #[tokio::test]
    async fn already_stopped_container_is_only_removed() {
        let backend = ScriptedBackend::new();
        let mut handle = started(&backend, "runner").await;
        handle.stopped = true;
        release_container(&backend, &RunContext::new(), &handle, Duration::from_secs(1))
            .await
            .expect("released");
        assert!(!backend.calls().iter().any(|c| matches!(c, BackendCall::Stop(..))));
    }
}
