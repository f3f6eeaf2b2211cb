//! The orchestration driver.
//!
//! Runs the forward steps strictly in order, stops at the first fatal
//! failure, and then always tears down whatever was acquired. Verification
//! of the messaging contract happens during teardown whenever the mock
//! came up, regardless of how far the run got.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use contest_common::error::Result;
use contest_runtime::backend::ContainerBackend;
use contest_runtime::context::RunContext;

use crate::environment::{Environment, MockContainer, Phase};
use crate::error::{OrchestratorError, Step};
use crate::expectations::ExpectationClient;
use crate::report::{RunReport, StepFailure, Verification};
use crate::runner;
use crate::teardown::release_container;
use crate::{mock, network, service};

/// Receives progress notifications from the driver.
pub trait RunObserver: Send + Sync {
    /// A forward step is starting.
    fn on_step(&self, _step: Step) {}

    /// A forward step finished; `ok` is false on fatal failure.
    fn on_step_finished(&self, _step: Step, _ok: bool) {}

    /// Teardown is starting.
    fn on_teardown(&self) {}

    /// The messaging-contract verdict is known.
    fn on_verification(&self, _verdict: &Verification) {}
}

/// Drives one run against a container backend.
pub struct Orchestrator<B> {
    backend: B,
    observer: Option<Arc<dyn RunObserver>>,
}

impl<B> std::fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl<B: ContainerBackend> Orchestrator<B> {
    /// Creates a driver over `backend`.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            observer: None,
        }
    }

    /// Attaches a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The underlying backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs setup, the contract tests and teardown, and reports the outcome.
    ///
    /// Never fails: every failure is recorded in the returned report.
    pub async fn run(&self, env: &mut Environment) -> RunReport {
        let clock = Instant::now();
        let mut report = RunReport::begin();
        tracing::info!(
            backend = self.backend.name(),
            expected_messages = env.expected_message_count(),
            "contract test run starting"
        );

        match self.setup(env).await {
            Ok(()) => match self.step(Step::TestRun, runner::run_tests(&self.backend, env)).await {
                Ok(outcome) => report.runner = Some(outcome),
                Err(e) => report.runner_failure = Some(failure(&e)),
            },
            Err(e) => report.setup_failure = Some(failure(&e)),
        }

        report.warnings = env.warnings().to_vec();
        let (verification, teardown_warnings) = self.teardown(env).await;
        report.verification = verification;
        report.teardown_warnings = teardown_warnings;
        report.final_phase = env.phase().to_string();
        report.duration = clock.elapsed();

        tracing::info!(
            success = report.is_success(),
            phase = %report.final_phase,
            duration = ?report.duration,
            "contract test run finished"
        );
        report
    }

    /// Provisions the network, the mock and the service, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first fatal failure, tagged with its step. Resources
    /// acquired before the failure stay attached to `env` for teardown.
    pub async fn setup(&self, env: &mut Environment) -> std::result::Result<(), OrchestratorError> {
        self.step(Step::Network, network::provision_network(&self.backend, env))
            .await?;
        self.step(Step::Mock, mock::start_mock(&self.backend, env)).await?;
        self.step(Step::Service, service::start_service(&self.backend, env))
            .await
    }

    /// Releases everything attached to `env`, verifying expectations first
    /// if the mock is held.
    ///
    /// Uses a fresh context so cleanup proceeds after cancellation. Every
    /// step is attempted; failures are returned as warnings.
    pub async fn teardown(&self, env: &mut Environment) -> (Verification, Vec<String>) {
        if let Some(observer) = &self.observer {
            observer.on_teardown();
        }
        let ctx = env.ctx().detached();
        let config = env.config().clone();
        let mut warnings = Vec::new();

        if let Some(runner) = env.take_runner() {
            if let Err(e) = release_container(&self.backend, &ctx, &runner, config.runner_stop_grace()).await {
                warnings.push(format!("runner {}: {e}", runner.name));
            }
        }

        if let Some(service) = env.take_service() {
            if let Err(e) = release_container(&self.backend, &ctx, &service.handle, config.stop_grace()).await {
                warnings.push(format!("service {}: {e}", service.handle.name));
            }
            if let Err(e) = self.backend.remove_image(&ctx, &service.image).await {
                warnings.push(format!("service image {}: {e}", service.image));
            }
        }

        let verification = match env.take_mock() {
            Some(mock) => {
                let verdict = verify(&ctx, &mock, config.http_timeout()).await;
                env.advance(if verdict.is_passed() {
                    Phase::Verified
                } else {
                    Phase::VerificationFailed
                });
                if let Err(e) = release_container(&self.backend, &ctx, &mock.handle, config.stop_grace()).await {
                    warnings.push(format!("mock {}: {e}", mock.handle.name));
                }
                verdict
            }
            None => Verification::NotAttempted,
        };
        if let Some(observer) = &self.observer {
            observer.on_verification(&verification);
        }

        if let Some(net) = env.take_network() {
            if let Err(e) = network::release_network(&self.backend, &ctx, net).await {
                warnings.push(format!("network: {e}"));
            }
        }

        for warning in &warnings {
            tracing::warn!(warning = %warning, "teardown step failed");
        }
        env.advance(Phase::TornDown);
        (verification, warnings)
    }

    async fn step<T>(
        &self,
        step: Step,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, OrchestratorError> {
        tracing::info!(step = step.number(), "{}", step.title());
        if let Some(observer) = &self.observer {
            observer.on_step(step);
        }
        let result = fut.await.map_err(OrchestratorError::at(step));
        if let Err(e) = &result {
            tracing::error!(step = step.number(), error = %e, "step failed");
        }
        if let Some(observer) = &self.observer {
            observer.on_step_finished(step, result.is_ok());
        }
        result
    }
}

fn failure(e: &OrchestratorError) -> StepFailure {
    match e {
        OrchestratorError::Phase { step, source } => StepFailure::new(*step, source.to_string()),
    }
}

async fn verify(ctx: &RunContext, mock: &MockContainer, timeout: std::time::Duration) -> Verification {
    let result = match ExpectationClient::new(mock.admin.base_url(), timeout) {
        Ok(client) => client.verify(ctx).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            tracing::info!(admin = %mock.admin, "messaging expectations verified");
            Verification::Passed
        }
        Err(e) => {
            tracing::warn!(admin = %mock.admin, error = %e, "messaging expectations failed");
            Verification::Failed {
                reason: e.to_string(),
                errors: e.discrepancies().to_vec(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use contest_common::config::HarnessConfig;
    use contest_runtime::backend::scripted::{BackendCall, ScriptedBackend};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RunObserver for Recorder {
        fn on_step(&self, step: Step) {
            if let Ok(mut events) = self.events.lock() {
                events.push(format!("start {}", step.number()));
            }
        }

        fn on_step_finished(&self, step: Step, ok: bool) {
            if let Ok(mut events) = self.events.lock() {
                events.push(format!("end {} {ok}", step.number()));
            }
        }

        fn on_teardown(&self) {
            if let Ok(mut events) = self.events.lock() {
                events.push("teardown".into());
            }
        }
    }

    #[tokio::test]
    async fn network_failure_skips_every_later_step() {
        let recorder = Arc::new(Recorder::default());
        let orchestrator = Orchestrator::new(ScriptedBackend::new().fail_network("no address pools"))
            .with_observer(Arc::clone(&recorder) as Arc<dyn RunObserver>);
        let mut env = Environment::new(HarnessConfig::default(), ".");

        let report = orchestrator.run(&mut env).await;

        let failure = report.setup_failure.as_ref().expect("setup failed");
        assert_eq!(failure.step, "network provisioning");
        assert!(failure.message.contains("no address pools"));
        assert_eq!(report.verification, Verification::NotAttempted);
        assert!(!report.is_success());
        assert_eq!(env.phase(), Phase::TornDown);
        assert!(orchestrator.backend().started().is_empty());

        let events = recorder.events.lock().expect("events").clone();
        assert_eq!(events, vec!["start 1", "end 1 false", "teardown"]);
    }

    #[tokio::test]
    async fn missing_contract_aborts_at_mock_and_removes_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut env = Environment::new(HarnessConfig::default(), dir.path());

        let report = orchestrator.run(&mut env).await;

        assert_eq!(report.setup_failure.expect("failed").step, "mock startup");
        assert!(orchestrator.backend().networks().is_empty());
        assert!(orchestrator
            .backend()
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::RemoveNetwork(_))));
    }

    #[tokio::test]
    async fn teardown_of_empty_environment_is_a_no_op() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut env = Environment::new(HarnessConfig::default(), ".");

        let (verdict, warnings) = orchestrator.teardown(&mut env).await;

        assert_eq!(verdict, Verification::NotAttempted);
        assert!(warnings.is_empty());
        assert!(orchestrator.backend().calls().is_empty());
        assert_eq!(env.phase(), Phase::TornDown);
    }
}
