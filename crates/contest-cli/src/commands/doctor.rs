//! `contest doctor` — Check the container runtime and the configuration.

use std::path::Path;
use std::process::ExitCode;

use clap::Args;
use contest_common::config::HarnessConfig;
use contest_runtime::backend::ContainerBackend;
use contest_runtime::backend::docker::DockerBackend;
use contest_runtime::container::BuildSpec;
use contest_runtime::context::RunContext;

use crate::output::{BOLD, DIM, GREEN, RED, RESET};

/// Arguments for the `doctor` command.
#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Only check files and configuration; skip the container runtime.
    #[arg(long)]
    pub offline: bool,
}

/// Outcome of a single check.
#[derive(Debug)]
struct Check {
    name: &'static str,
    result: Result<String, String>,
}

impl Check {
    fn from_result<T, E: std::fmt::Display>(
        name: &'static str,
        result: Result<T, E>,
        describe: impl FnOnce(T) -> String,
    ) -> Self {
        Self {
            name,
            result: result.map(describe).map_err(|e| e.to_string()),
        }
    }

    const fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Executes the `doctor` command.
///
/// # Errors
///
/// Never fails on its own; failed checks are reported through the exit code.
pub async fn execute(args: DoctorArgs, config: &HarnessConfig, workdir: &Path) -> anyhow::Result<ExitCode> {
    let mut checks = Vec::new();
    if !args.offline {
        checks.extend(runtime_checks(config).await);
    }
    checks.extend(workspace_checks(config, workdir));

    eprintln!();
    eprintln!("  {BOLD}contest doctor{RESET}");
    for check in &checks {
        match &check.result {
            Ok(detail) => eprintln!("  {GREEN}✓{RESET} {:<18} {DIM}{detail}{RESET}", check.name),
            Err(reason) => eprintln!("  {RED}✗{RESET} {:<18} {reason}", check.name),
        }
    }
    eprintln!();

    Ok(super::exit_code(checks.iter().all(Check::passed)))
}

async fn runtime_checks(config: &HarnessConfig) -> Vec<Check> {
    let backend = match DockerBackend::connect() {
        Ok(backend) => backend,
        Err(e) => return vec![Check::from_result::<(), _>("runtime client", Err(e), |()| String::new())],
    };
    let ctx = RunContext::with_timeout(config.http_timeout());
    vec![
        Check {
            name: "runtime client",
            result: Ok(backend.name().to_string()),
        },
        Check::from_result("runtime daemon", backend.server_version(&ctx).await, |version| {
            format!("reachable, engine {version}")
        }),
    ]
}

fn workspace_checks(config: &HarnessConfig, workdir: &Path) -> Vec<Check> {
    let build = BuildSpec::new(workdir.join(&config.build_context), &config.dockerfile, "contest-sut");
    vec![
        Check::from_result("configuration", config.validate(), |()| {
            format!("{} expectation(s)", config.expectations.len())
        }),
        Check::from_result("contract file", config.contract_path(workdir), |path| {
            path.display().to_string()
        }),
        Check::from_result("build file", build.check(), |()| {
            build.dockerfile_path().display().to_string()
        }),
    ]
}
