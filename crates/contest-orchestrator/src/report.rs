//! Aggregated outcome of one run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::environment::Phase;
use crate::error::Step;
use crate::runner::RunnerOutcome;

/// Messaging-contract verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// The mock never started, so there was nothing to verify.
    NotAttempted,
    /// Every expectation was met.
    Passed,
    /// Expectations were unmet, or the mock could not be asked.
    Failed {
        /// Why verification failed.
        reason: String,
        /// Discrepancies reported by the mock.
        errors: Vec<String>,
    },
}

impl Verification {
    /// Whether the verdict is a pass.
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// A fatal failure during setup or the test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    /// Step that failed.
    pub step: String,
    /// Rendered error chain.
    pub message: String,
}

impl StepFailure {
    /// Records `message` as the failure of `step`.
    #[must_use]
    pub fn new(step: Step, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            message: message.into(),
        }
    }
}

/// Everything a caller needs to judge and diagnose a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Phase the run ended in.
    pub final_phase: String,
    /// Fatal failure of network, mock or service setup.
    pub setup_failure: Option<StepFailure>,
    /// Runner outcome, if the runner's log was captured.
    pub runner: Option<RunnerOutcome>,
    /// Failure to start or talk to the runner.
    pub runner_failure: Option<StepFailure>,
    /// Messaging-contract verdict.
    pub verification: Verification,
    /// Soft failures during setup and the run.
    pub warnings: Vec<String>,
    /// Best-effort cleanup failures.
    pub teardown_warnings: Vec<String>,
}

impl RunReport {
    /// Empty report for a run starting now.
    #[must_use]
    pub fn begin() -> Self {
        Self {
            started_at: Utc::now(),
            duration: Duration::ZERO,
            final_phase: Phase::Idle.to_string(),
            setup_failure: None,
            runner: None,
            runner_failure: None,
            verification: Verification::NotAttempted,
            warnings: Vec::new(),
            teardown_warnings: Vec::new(),
        }
    }

    /// Whether the run passed.
    ///
    /// A run fails on any setup failure, on failure to communicate with
    /// the runner, or on a failed verification. The runner's exit code
    /// alone does not fail the run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.setup_failure.is_none()
            && self.runner_failure.is_none()
            && self.runner.is_some()
            && self.verification.is_passed()
    }

    /// Process exit code for the run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}
