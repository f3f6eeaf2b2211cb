//! Phase-scoped errors for the orchestration driver.

use std::fmt;

use contest_common::error::ContestError;
use thiserror::Error;

/// Forward step of a run that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Creating the isolated network.
    Network,
    /// Starting the mock and discovering its endpoints.
    Mock,
    /// Building and starting the service-under-test.
    Service,
    /// Running the contract tests.
    TestRun,
}

impl Step {
    /// Position of the step in the narrated sequence.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Network => 1,
            Self::Mock => 2,
            Self::Service => 3,
            Self::TestRun => 4,
        }
    }

    /// Headline shown when the step begins.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Network => "Creating isolated network",
            Self::Mock => "Starting mock (HTTP stub + message broker)",
            Self::Service => "Starting service under test",
            Self::TestRun => "Running contract tests",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network provisioning"),
            Self::Mock => write!(f, "mock startup"),
            Self::Service => write!(f, "service startup"),
            Self::TestRun => write!(f, "contract test run"),
        }
    }
}

/// A fatal failure, tagged with the step it interrupted.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A forward step failed.
    #[error("{step} failed: {source}")]
    Phase {
        /// Step that failed.
        step: Step,
        /// Underlying failure.
        source: ContestError,
    },
}

impl OrchestratorError {
    /// Wraps `source` with the step it interrupted.
    #[must_use]
    pub const fn phase(step: Step, source: ContestError) -> Self {
        Self::Phase { step, source }
    }

    /// Step that failed.
    #[must_use]
    pub const fn step(&self) -> Step {
        match self {
            Self::Phase { step, .. } => *step,
        }
    }

    /// Returns a closure wrapping errors with `step`, for `map_err`.
    pub fn at(step: Step) -> impl FnOnce(ContestError) -> Self {
        move |source| Self::phase(step, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_error_names_step() {
        let err = OrchestratorError::phase(Step::Service, ContestError::runtime("build image", "no such file"));
        assert_eq!(
            err.to_string(),
            "service startup failed: container runtime failed to build image: no such file"
        );
        assert_eq!(err.step(), Step::Service);
    }

    #[test]
    fn steps_are_numbered_in_order() {
        let numbers: Vec<u8> = [Step::Network, Step::Mock, Step::Service, Step::TestRun]
            .iter()
            .map(|s| s.number())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }
}
