//! `contest expect` — Register message expectations with a running mock.

use std::process::ExitCode;

use clap::Args;
use contest_common::config::HarnessConfig;
use contest_common::types::Expectation;
use contest_runtime::context::RunContext;

use super::AdminArgs;
use crate::output::{GREEN, RESET};

/// Arguments for the `expect` command.
#[derive(Args, Debug)]
pub struct ExpectArgs {
    #[command(flatten)]
    pub admin: AdminArgs,

    /// Expectation as `topic=count`; repeatable. Defaults to the configured expectations.
    #[arg(long = "topic", value_parser = parse_expectation)]
    pub topics: Vec<Expectation>,
}

/// Executes the `expect` command.
///
/// # Errors
///
/// Returns an error if the mock rejects the expectations or cannot be reached.
pub async fn execute(args: ExpectArgs, config: &HarnessConfig) -> anyhow::Result<ExitCode> {
    let expectations = if args.topics.is_empty() {
        config.expectations.clone()
    } else {
        args.topics
    };
    let client = args.admin.client(config)?;
    let ctx = RunContext::with_timeout(config.http_timeout());
    client.register(&ctx, &expectations).await?;

    for expectation in &expectations {
        eprintln!(
            "  {GREEN}✓{RESET} expecting {} message(s) on {}",
            expectation.count, expectation.topic
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn parse_expectation(raw: &str) -> Result<Expectation, String> {
    let (topic, count) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected topic=count, got {raw:?}"))?;
    let topic = topic.trim();
    if topic.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid count {count:?}: {e}"))?;
    Ok(Expectation::new(topic, count))
}
