//! Run-scoped execution context carrying cancellation and a deadline.

use std::future::Future;
use std::time::Duration;

use contest_common::error::{ContestError, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline shared by every blocking operation of a run.
///
/// Cloning is cheap; clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    /// Creates a context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Creates a context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Creates a context with an optional timeout.
    #[must_use]
    pub fn with_optional_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::new, Self::with_timeout)
    }

    /// Returns a fresh, uncancelled context with no deadline.
    ///
    /// Used for teardown after the run context was cancelled, so
    /// containers are still released.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self::new()
    }

    /// Cancels the context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns whether the context was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns whether the deadline, if any, has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns the cancellation token, for wiring signal handlers.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Drives `fut` to completion unless the context is cancelled or the
    /// deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::Cancelled`] or
    /// [`ContestError::DeadlineExceeded`] naming `what`.
    pub async fn run<F, T>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ContestError::Cancelled { what: what.to_string() }),
            () = deadline_elapsed(self.deadline) => {
                Err(ContestError::DeadlineExceeded { what: what.to_string() })
            }
            out = fut => Ok(out),
        }
    }

    /// Sleeps for `duration`, waking early on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the context is interrupted during the sleep.
    pub async fn sleep(&self, what: &str, duration: Duration) -> Result<()> {
        self.run(what, tokio::time::sleep(duration)).await
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_output_when_not_interrupted() {
        let ctx = RunContext::new();
        let value = ctx.run("answer", async { 42 }).await.expect("should complete");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn cancelled_context_aborts_pending_future() {
        let ctx = RunContext::new();
        ctx.cancel();
        let err = ctx
            .run("forever", std::future::pending::<()>())
            .await
            .expect_err("should be cancelled");
        assert!(matches!(err, ContestError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn clones_share_cancellation() {
        let ctx = RunContext::new();
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_sleep() {
        let ctx = RunContext::with_timeout(Duration::from_secs(5));
        let err = ctx
            .sleep("nap", Duration::from_secs(60))
            .await
            .expect_err("deadline should fire");
        assert!(matches!(err, ContestError::DeadlineExceeded { .. }));
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn detached_context_ignores_parent_cancellation() {
        let ctx = RunContext::with_timeout(Duration::from_secs(1));
        ctx.cancel();
        let detached = ctx.detached();
        assert!(!detached.is_cancelled());
        assert!(detached.remaining().is_none());
    }
}
