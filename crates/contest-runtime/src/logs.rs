//! Readiness conditions over container log output.

use std::fmt;
use std::time::Duration;

use contest_common::error::{ContestError, Result};
use contest_common::types::ContainerId;

use crate::backend::ContainerBackend;
use crate::context::RunContext;

/// Predicate over a container's accumulated log text: a literal marker
/// that may appear anywhere in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMatcher {
    marker: String,
}

impl LogMatcher {
    /// Literal substring matcher.
    #[must_use]
    pub fn literal(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    /// Returns whether `text` satisfies the predicate.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        text.contains(self.marker.as_str())
    }
}

impl fmt::Display for LogMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log line {:?}", self.marker)
    }
}

/// A bounded wait for a log condition.
#[derive(Debug, Clone)]
pub struct LogWait {
    /// Condition to wait for.
    pub matcher: LogMatcher,
    /// Upper bound on the wait.
    pub timeout: Duration,
    /// Delay between log polls.
    pub poll_interval: Duration,
}

impl LogWait {
    /// Waits for `marker` to appear, polling every 500ms.
    #[must_use]
    pub fn for_line(marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            matcher: LogMatcher::literal(marker),
            timeout,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Overrides the poll interval.
    #[must_use]
    pub const fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Polls the container's logs until `wait.matcher` matches.
///
/// Returns the log text that satisfied the condition.
///
/// # Errors
///
/// - [`ContestError::Timeout`] once `wait.timeout` elapses.
/// - [`ContestError::ContainerExited`] if the container stops without
///   ever logging the marker.
/// - [`ContestError::Cancelled`] / [`ContestError::DeadlineExceeded`] when
///   the run context is interrupted.
/// - Any backend error raised while reading logs or state.
pub async fn wait_for_log<B: ContainerBackend>(
    backend: &B,
    ctx: &RunContext,
    id: &ContainerId,
    wait: &LogWait,
) -> Result<String> {
    tracing::debug!(container = %id.short(), condition = %wait.matcher, timeout = ?wait.timeout, "waiting for readiness");
    match tokio::time::timeout(wait.timeout, poll_until_match(backend, ctx, id, wait)).await {
        Ok(result) => result,
        Err(_) => Err(ContestError::Timeout {
            what: format!("{} from container {}", wait.matcher, id.short()),
            after: wait.timeout,
        }),
    }
}

async fn poll_until_match<B: ContainerBackend>(
    backend: &B,
    ctx: &RunContext,
    id: &ContainerId,
    wait: &LogWait,
) -> Result<String> {
    loop {
        let text = backend.logs(ctx, id).await?;
        if wait.matcher.is_match(&text) {
            return Ok(text);
        }

        let state = backend.state(ctx, id).await?;
        if let contest_common::types::ContainerState::Exited { code } = state {
            // Output may have been flushed between the two reads.
            let text = backend.logs(ctx, id).await?;
            if wait.matcher.is_match(&text) {
                return Ok(text);
            }
            return Err(ContestError::ContainerExited {
                container: id.short().to_string(),
                code,
                waiting_for: wait.matcher.to_string(),
            });
        }

        ctx.sleep("log poll interval", wait.poll_interval).await?;
    }
}
