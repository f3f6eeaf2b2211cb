//! `contest verify` — Ask a running mock whether its expectations were met.

use std::process::ExitCode;

use clap::Args;
use contest_common::config::HarnessConfig;
use contest_orchestrator::Verification;
use contest_runtime::context::RunContext;

use super::AdminArgs;
use crate::output;

/// Arguments for the `verify` command.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub admin: AdminArgs,
}

/// Executes the `verify` command.
///
/// Unmet expectations and unreachable mocks both exit non-zero.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn execute(args: VerifyArgs, config: &HarnessConfig) -> anyhow::Result<ExitCode> {
    let client = args.admin.client(config)?;
    let ctx = RunContext::with_timeout(config.http_timeout());
    let verdict = match client.verify(&ctx).await {
        Ok(()) => Verification::Passed,
        Err(e) => Verification::Failed {
            reason: e.to_string(),
            errors: e.discrepancies().to_vec(),
        },
    };
    output::print_verification(&verdict);
    Ok(super::exit_code(verdict.is_passed()))
}
