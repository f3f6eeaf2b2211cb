//! `contest run` — Run the full contract-test cycle.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use contest_common::config::HarnessConfig;
use contest_orchestrator::{Environment, Orchestrator};
use contest_runtime::backend::ContainerBackend;
use contest_runtime::backend::docker::DockerBackend;

use crate::output::{self, StepBanner};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Expected message count for every registered channel.
    #[arg(long)]
    pub expected_messages: Option<u32>,

    /// Build context of the service under test.
    #[arg(long)]
    pub build_context: Option<PathBuf>,

    /// Build file, relative to the build context.
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Image running the mock.
    #[arg(long)]
    pub mock_image: Option<String>,

    /// Image running the contract tests.
    #[arg(long)]
    pub runner_image: Option<String>,

    /// Deadline for the whole run, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Write the run report as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Do not echo the contract-test output.
    #[arg(long, short)]
    pub quiet: bool,
}

impl RunArgs {
    /// Applies flag overrides on top of file and environment settings.
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(path) = &self.build_context {
            config.build_context.clone_from(path);
        }
        if let Some(path) = &self.dockerfile {
            config.dockerfile.clone_from(path);
        }
        if let Some(image) = &self.mock_image {
            config.mock_image.clone_from(image);
        }
        if let Some(image) = &self.runner_image {
            config.runner_image.clone_from(image);
        }
        if let Some(secs) = self.timeout {
            config.run_timeout_secs = Some(secs);
        }
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the container
/// runtime is unusable. A failed run is reported through the exit code.
pub async fn execute(args: RunArgs, mut config: HarnessConfig, workdir: PathBuf) -> anyhow::Result<ExitCode> {
    output::print_header();
    args.apply(&mut config);
    config.validate()?;
    let contract = config.contract_path(&workdir)?;
    tracing::info!(contract = %contract.display(), workdir = %workdir.display(), "starting run");

    let backend = DockerBackend::connect()?;
    if !backend.is_available().await {
        anyhow::bail!(
            "container runtime `{}` is not reachable\n\
             Start the daemon or run `contest doctor` for details",
            backend.name()
        );
    }

    let mut env = Environment::new(config, workdir);
    if let Some(count) = args.expected_messages {
        env.set_expected_message_count(count);
    }

    let token = env.ctx().token();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupted, cancelling run");
        token.cancel();
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let orchestrator = Orchestrator::new(backend).with_observer(Arc::new(StepBanner));
    let report = orchestrator.run(&mut env).await;

    if let Some(runner) = &report.runner {
        if !args.quiet {
            output::print_runner_log(&runner.log);
        }
    }
    output::print_verification(&report.verification);
    output::print_summary(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("failed to write report {}: {e}", path.display()))?;
    }

    Ok(super::exit_code(report.is_success()))
}
