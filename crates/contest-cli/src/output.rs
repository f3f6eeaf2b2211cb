//! Formatted output helpers for CLI commands.
//!
//! Step banners, the captured runner log, and the verdict lines all go to
//! stderr with ANSI styling; tracing output is interleaved with them.

use std::time::Duration;

use contest_orchestrator::report::RunReport;
use contest_orchestrator::runner::RunnerOutcome;
use contest_orchestrator::{RunObserver, Step, Verification};

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RESET: &str = "\x1b[0m";

/// Total number of forward steps narrated during a run.
const STEP_COUNT: u8 = 4;

pub fn print_header() {
    eprintln!();
    eprintln!("  {BOLD}contest{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}

/// Prints the run's progress as step banners.
#[derive(Debug, Default)]
pub struct StepBanner;

impl RunObserver for StepBanner {
    fn on_step(&self, step: Step) {
        eprintln!();
        eprintln!(
            "  {CYAN}{BOLD}STEP {}/{STEP_COUNT}{RESET} {BOLD}{}{RESET}",
            step.number(),
            step.title()
        );
    }

    fn on_step_finished(&self, step: Step, ok: bool) {
        if ok {
            eprintln!("  {GREEN}✓{RESET} {step} complete");
        } else {
            eprintln!("  {RED}✗{RESET} {step} failed");
        }
    }

    fn on_teardown(&self) {
        eprintln!();
        eprintln!("  {DIM}Tearing down...{RESET}");
    }
}

pub fn print_runner_log(log: &str) {
    eprintln!();
    eprintln!("  {BOLD}=== Contract test output ==={RESET}");
    for line in log.lines() {
        eprintln!("  {DIM}│{RESET} {line}");
    }
}

pub fn print_verification(verdict: &Verification) {
    eprintln!();
    match verdict {
        Verification::Passed => {
            eprintln!("  {GREEN}{BOLD}PASS{RESET} messaging expectations verified");
        }
        Verification::Failed { reason, errors } => {
            eprintln!("  {RED}{BOLD}FAIL{RESET} messaging expectations: {reason}");
            for error in errors {
                eprintln!("       {RED}-{RESET} {error}");
            }
        }
        Verification::NotAttempted => {
            eprintln!("  {YELLOW}SKIP{RESET} messaging expectations not verified (mock never started)");
        }
    }
}

pub fn print_summary(report: &RunReport) {
    for warning in &report.warnings {
        eprintln!("  {YELLOW}warning:{RESET} {warning}");
    }
    for warning in &report.teardown_warnings {
        eprintln!("  {YELLOW}cleanup:{RESET} {warning}");
    }
    if let Some(failure) = report.setup_failure.as_ref().or(report.runner_failure.as_ref()) {
        eprintln!("  {RED}error:{RESET} {} failed: {}", failure.step, failure.message);
    }
    if let Some(runner) = &report.runner {
        eprintln!("  {DIM}runner: {}{RESET}", runner_status(runner));
    }

    eprintln!();
    let took = format_duration(report.duration);
    if report.is_success() {
        eprintln!("  {GREEN}{BOLD}Contract tests passed{RESET} in {took}");
    } else {
        eprintln!("  {RED}{BOLD}Contract tests failed{RESET} in {took}");
    }
}

fn runner_status(runner: &RunnerOutcome) -> String {
    match runner.exit_code {
        Some(code) => format!("exited with code {code}"),
        None if runner.stopped_by_harness => "stopped by harness".to_string(),
        None => "exit code unknown".to_string(),
    }
}

/// Formats a duration as `1m 05s` or `4.2s`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_millis() as f64 / 1000.0)
    }
}
