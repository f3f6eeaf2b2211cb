//! End-to-end runs of the orchestration driver.
//!
//! Containers are simulated by the scripted backend. The mock's admin API
//! is a real HTTP server that counts registered expectations against the
//! messages the simulated service "produces" while the runner is active:
//! 1. Exact message count verifies
//! 2. One message short, or one too many, fails verification with details
//! 3. Verification still runs when the service never comes up
//! 4. The runner's log survives a non-zero exit
//! 5. Two mocks in separate runs get separate ports
//! 6. Cancellation mid-run still tears everything down
//! 7. Bind-mount sources are absolute even for a relative working directory

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use contest_common::config::HarnessConfig;
use contest_orchestrator::environment::Environment;
use contest_orchestrator::{Orchestrator, Phase, Verification, mock, network};
use contest_runtime::backend::scripted::{BackendCall, ContainerScript, ScriptedBackend};
use contest_runtime::context::RunContext;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

const TOPIC: &str = "product-queries";

// ── Fake admin API ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Ledger {
    registered: Vec<(String, u64)>,
    produced: HashMap<String, u64>,
    register_calls: usize,
    verify_calls: usize,
}

#[derive(Clone, Default)]
struct AdminState {
    ledger: Arc<Mutex<Ledger>>,
}

impl AdminState {
    fn produce(&self, topic: &str, count: u64) {
        let mut ledger = self.ledger.lock().unwrap();
        *ledger.produced.entry(topic.to_string()).or_default() += count;
    }

    fn register_calls(&self) -> usize {
        self.ledger.lock().unwrap().register_calls
    }

    fn verify_calls(&self) -> usize {
        self.ledger.lock().unwrap().verify_calls
    }

    fn is_registered(&self) -> bool {
        !self.ledger.lock().unwrap().registered.is_empty()
    }
}

struct FakeAdmin {
    port: u16,
    state: AdminState,
    join: JoinHandle<()>,
}

impl Drop for FakeAdmin {
    fn drop(&mut self) {
        self.join.abort();
    }
}

async fn spawn_admin() -> FakeAdmin {
    let state = AdminState::default();
    let app = Router::new()
        .route("/_expectations", post(register))
        .route("/_expectations/verification_status", get(verification_status))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    FakeAdmin { port, state, join }
}

async fn register(State(state): State<AdminState>, Json(body): Json<Value>) -> StatusCode {
    let Some(entries) = body.get("expectations").and_then(Value::as_array) else {
        return StatusCode::BAD_REQUEST;
    };
    let mut ledger = state.ledger.lock().unwrap();
    ledger.register_calls += 1;
    for entry in entries {
        let topic = entry.get("topic").and_then(Value::as_str).unwrap_or_default();
        let count = entry.get("count").and_then(Value::as_u64).unwrap_or_default();
        ledger.registered.push((topic.to_string(), count));
    }
    StatusCode::OK
}

async fn verification_status(State(state): State<AdminState>) -> Json<Value> {
    let mut ledger = state.ledger.lock().unwrap();
    ledger.verify_calls += 1;
    let errors: Vec<String> = ledger
        .registered
        .iter()
        .filter_map(|(topic, expected)| {
            let actual = ledger.produced.get(topic).copied().unwrap_or_default();
            (actual != *expected).then(|| format!("expected {expected}, got {actual} for {topic}"))
        })
        .collect();
    if errors.is_empty() {
        Json(json!({"success": true}))
    } else {
        Json(json!({"success": false, "errors": errors}))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

fn workdir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("specmatic.yaml"), "version: 2\n").expect("contract");
    std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").expect("dockerfile");
    dir
}

fn config() -> HarnessConfig {
    HarnessConfig {
        log_poll_interval_ms: 1,
        mock_startup_timeout_secs: 5,
        service_startup_timeout_secs: 5,
        runner_timeout_secs: 5,
        http_timeout_secs: 5,
        ..HarnessConfig::default()
    }
}

fn mock_script() -> ContainerScript {
    ContainerScript::logging([
        "Loading specmatic.yaml",
        "[kafka] advertised listeners EXTERNAL://0.0.0.0:29092",
        "AsyncMock has started",
    ])
}

fn service_script() -> ContainerScript {
    ContainerScript::logging(["Listening and serving HTTP on :8080"])
}

/// Runner whose start makes the service publish `messages` to the topic.
fn runner_script(admin: &FakeAdmin, messages: u64) -> ContainerScript {
    let state = admin.state.clone();
    ContainerScript::logging(["Tests run: 4", "Passed Tests: 4", "Failed Tests: 0"])
        .on_start(move || state.produce(TOPIC, messages))
}

fn backend_for(admin: &FakeAdmin, messages: u64) -> ScriptedBackend {
    ScriptedBackend::new()
        .with_fixed_port(9999, admin.port)
        .script("contest-mock", mock_script())
        .script("contest-sut", service_script())
        .script("contest-runner", runner_script(admin, messages))
}

fn removed(backend: &ScriptedBackend) -> usize {
    backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::Remove(_)))
        .count()
}

fn env_in(dir: &Path) -> Environment {
    Environment::new(config(), dir)
}

// ── Messaging contract ───────────────────────────────────────────────

#[tokio::test]
async fn exact_message_count_verifies() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let orchestrator = Orchestrator::new(backend_for(&admin, 2));
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    assert!(report.is_success(), "{report:#?}");
    assert_eq!(report.verification, Verification::Passed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(admin.state.register_calls(), 1);
    assert_eq!(admin.state.verify_calls(), 1);
    assert!(report.runner.as_ref().expect("runner").log.contains("Passed Tests: 4"));
    assert_eq!(env.phase(), Phase::TornDown);
    assert_eq!(report.final_phase, "torn-down");

    let backend = orchestrator.backend();
    assert_eq!(removed(backend), 3);
    assert!(backend.networks().is_empty());
    let service = &backend.started()[1];
    assert_eq!(service.env_var("KAFKA_PORT"), Some("29092"));
}

#[tokio::test]
async fn one_message_short_fails_with_discrepancy() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let orchestrator = Orchestrator::new(backend_for(&admin, 1));
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);
    match &report.verification {
        Verification::Failed { errors, .. } => {
            assert_eq!(errors, &vec!["expected 2, got 1 for product-queries".to_string()]);
        }
        other => panic!("expected failed verification, got {other:?}"),
    }
    // The HTTP contract itself passed; only the messaging side failed.
    assert!(report.runner_failure.is_none());
    assert!(report.setup_failure.is_none());
}

#[tokio::test]
async fn one_message_too_many_fails_with_discrepancy() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let orchestrator = Orchestrator::new(backend_for(&admin, 3));
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    match &report.verification {
        Verification::Failed { errors, .. } => assert!(!errors.is_empty()),
        other => panic!("expected failed verification, got {other:?}"),
    }
}

#[tokio::test]
async fn expectations_are_registered_before_service_starts() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let registered_first = Arc::new(Mutex::new(None));
    let service = {
        let state = admin.state.clone();
        let seen = Arc::clone(&registered_first);
        service_script().on_start(move || {
            *seen.lock().unwrap() = Some(state.is_registered());
        })
    };
    let backend = ScriptedBackend::new()
        .with_fixed_port(9999, admin.port)
        .script("contest-mock", mock_script())
        .script("contest-sut", service)
        .script("contest-runner", runner_script(&admin, 2));
    let orchestrator = Orchestrator::new(backend);
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    assert!(report.is_success(), "{report:#?}");
    assert_eq!(*registered_first.lock().unwrap(), Some(true));
}

// ── Failure paths ────────────────────────────────────────────────────

#[tokio::test]
async fn service_build_failure_still_verifies() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let orchestrator = Orchestrator::new(backend_for(&admin, 0).fail_build("COPY failed: no source files"));
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    let failure = report.setup_failure.as_ref().expect("service failed");
    assert_eq!(failure.step, "service startup");
    assert!(failure.message.contains("COPY failed"));
    assert!(report.runner.is_none());
    assert_eq!(admin.state.verify_calls(), 1);
    assert!(matches!(report.verification, Verification::Failed { .. }));

    let backend = orchestrator.backend();
    assert_eq!(backend.started().len(), 1, "only the mock ran");
    assert_eq!(removed(backend), 1);
    assert!(backend.networks().is_empty());
}

#[tokio::test]
async fn service_crash_is_released_and_mock_verified() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let backend = ScriptedBackend::new()
        .with_fixed_port(9999, admin.port)
        .script("contest-mock", mock_script())
        .script("contest-sut", ContainerScript::logging(["dial tcp kafka:29092: refused"]).exits_with(1))
        .script("contest-runner", runner_script(&admin, 2));
    let orchestrator = Orchestrator::new(backend);
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    assert_eq!(report.setup_failure.as_ref().expect("failed").step, "service startup");
    assert_eq!(admin.state.verify_calls(), 1);
    let backend = orchestrator.backend();
    assert_eq!(removed(backend), 2);
    assert!(backend.calls().iter().any(|c| matches!(c, BackendCall::RemoveImage(_))));
}

#[tokio::test]
async fn runner_log_survives_nonzero_exit() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let state = admin.state.clone();
    let runner = ContainerScript::logging(["Tests run: 4", "Passed Tests: 3", "Failed Tests: 1"])
        .exits_with(1)
        .on_start(move || state.produce(TOPIC, 2));
    let backend = ScriptedBackend::new()
        .with_fixed_port(9999, admin.port)
        .script("contest-mock", mock_script())
        .script("contest-sut", service_script())
        .script("contest-runner", runner);
    let orchestrator = Orchestrator::new(backend);
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    let runner = report.runner.as_ref().expect("log captured");
    assert_eq!(runner.exit_code, Some(1));
    assert!(runner.log.contains("Failed Tests: 1"));
    assert!(report.is_success(), "exit code alone does not fail the run");
    let on_disk = std::fs::read_to_string(dir.path().join("build/reports/contest-runner.log")).expect("log file");
    assert!(on_disk.contains("Passed Tests: 3"));
}

#[tokio::test]
async fn relative_workdir_mounts_absolute_sources() {
    let admin = spawn_admin().await;
    let dir = tempfile::Builder::new()
        .prefix("contest-rel")
        .tempdir_in(".")
        .expect("tempdir");
    let cwd = std::env::current_dir().expect("cwd");
    let relative = dir.path().strip_prefix(&cwd).unwrap_or(dir.path()).to_path_buf();
    assert!(relative.is_relative());
    std::fs::write(relative.join("specmatic.yaml"), "version: 2\n").expect("contract");
    std::fs::write(relative.join("Dockerfile"), "FROM scratch\n").expect("dockerfile");

    let orchestrator = Orchestrator::new(backend_for(&admin, 2));
    let mut env = env_in(&relative);

    let report = orchestrator.run(&mut env).await;
    assert!(report.is_success(), "{report:#?}");

    let started = orchestrator.backend().started();
    for prefix in ["contest-mock", "contest-runner"] {
        let spec = started
            .iter()
            .find(|s| s.name.starts_with(prefix))
            .unwrap_or_else(|| panic!("{prefix} started"));
        assert!(!spec.mounts.is_empty(), "{prefix} has mounts");
        for mount in &spec.mounts {
            assert!(mount.host.is_absolute(), "{prefix} mounts {}", mount.host.display());
            assert!(mount.host.exists(), "{prefix} mounts {}", mount.host.display());
        }
    }
}

#[tokio::test]
async fn unreadable_runner_is_a_test_failure() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let backend = ScriptedBackend::new()
        .with_fixed_port(9999, admin.port)
        .script("contest-mock", mock_script())
        .script("contest-sut", service_script())
        .script("contest-runner", ContainerScript::default().logs_unreadable("unexpected EOF"));
    let orchestrator = Orchestrator::new(backend);
    let mut env = env_in(dir.path());

    let report = orchestrator.run(&mut env).await;

    let failure = report.runner_failure.as_ref().expect("runner failure");
    assert_eq!(failure.step, "contract test run");
    assert!(!report.is_success());
    assert_eq!(removed(orchestrator.backend()), 3, "runner released by teardown");
}

#[tokio::test]
async fn cancellation_mid_run_still_tears_down() {
    let admin = spawn_admin().await;
    let dir = workdir();
    let ctx = RunContext::new();
    let token = ctx.token();
    let backend = ScriptedBackend::new()
        .with_fixed_port(9999, admin.port)
        .script("contest-mock", mock_script())
        .script("contest-sut", ContainerScript::default().on_start(move || token.cancel()))
        .script("contest-runner", runner_script(&admin, 2));
    let orchestrator = Orchestrator::new(backend);
    let mut env = Environment::with_context(config(), dir.path(), ctx);

    let report = orchestrator.run(&mut env).await;

    let failure = report.setup_failure.as_ref().expect("cancelled");
    assert!(failure.message.contains("cancelled"), "{failure:?}");
    assert_eq!(admin.state.verify_calls(), 1);
    let backend = orchestrator.backend();
    assert_eq!(removed(backend), 2);
    assert!(backend.networks().is_empty());
    assert_eq!(env.phase(), Phase::TornDown);
}

// ── Isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn mocks_in_separate_runs_get_distinct_ports() {
    let dir = workdir();
    let backend = ScriptedBackend::new().script("contest-mock", mock_script());
    let mut first = env_in(dir.path());
    let mut second = env_in(dir.path());

    for env in [&mut first, &mut second] {
        network::provision_network(&backend, env).await.expect("network");
        mock::start_mock(&backend, env).await.expect("mock");
    }

    let a = first.mock().expect("first mock");
    let b = second.mock().expect("second mock");
    assert_ne!(a.admin.port, b.admin.port);
    assert_ne!(a.handle.id, b.handle.id);
    assert_ne!(first.network().expect("net").name(), second.network().expect("net").name());
}
