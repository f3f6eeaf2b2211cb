//! CLI command definitions and dispatch.

pub mod doctor;
pub mod expect;
pub mod run;
pub mod verify;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use contest_common::config::HarnessConfig;
use contest_orchestrator::expectations::ExpectationClient;

/// contest — containerized contract tests with messaging verification.
#[derive(Parser, Debug)]
#[command(name = "contest", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to `contest.yaml` in the working directory).
    #[arg(long, short = 'c', global = true, env = "CONTEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the contract file, reports and build context.
    #[arg(long, short = 'C', global = true, default_value = ".")]
    pub workdir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full contract-test cycle and verify messaging expectations.
    Run(run::RunArgs),
    /// Register message expectations with an already running mock.
    Expect(expect::ExpectArgs),
    /// Fetch the verification verdict from an already running mock.
    Verify(verify::VerifyArgs),
    /// Check the container runtime and the configuration.
    Doctor(doctor::DoctorArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command cannot be carried out at all. Test and
/// verification failures are reported through the exit code instead.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let workdir = absolute_workdir(&cli.workdir)?;
    let config = HarnessConfig::load(cli.config.as_deref(), &workdir)?;
    match cli.command {
        Command::Run(args) => run::execute(args, config, workdir).await,
        Command::Expect(args) => expect::execute(args, &config).await,
        Command::Verify(args) => verify::execute(args, &config).await,
        Command::Doctor(args) => doctor::execute(args, &config, &workdir).await,
    }
}

/// Anchors the working directory at the current directory. Paths derived
/// from it end up as bind-mount sources and build contexts.
fn absolute_workdir(workdir: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(workdir)
        .map_err(|e| anyhow::anyhow!("cannot resolve working directory {}: {e}", workdir.display()))
}

/// Location of a running mock's admin API.
#[derive(Args, Debug)]
pub struct AdminArgs {
    /// Host the admin API is reachable on.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Host-mapped admin API port (defaults to the configured admin port).
    #[arg(long)]
    pub port: Option<u16>,
}

impl AdminArgs {
    /// Builds a client for the addressed admin API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn client(&self, config: &HarnessConfig) -> anyhow::Result<ExpectationClient> {
        let port = self.port.unwrap_or(config.broker_admin_port);
        let endpoint = contest_orchestrator::environment::AdminEndpoint {
            host: self.host.clone(),
            port,
        };
        Ok(ExpectationClient::new(endpoint.base_url(), config.http_timeout())?)
    }
}

/// Converts a pass/fail verdict into a process exit code.
pub(crate) fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
