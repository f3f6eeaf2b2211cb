//! Unified error types for the contest workspace.
//!
//! Each higher-level crate defines its own domain-specific error enum that
//! wraps these common variants when appropriate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ContestError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The container runtime could not be reached.
    #[error("container runtime unreachable: {message}")]
    Unreachable {
        /// Why the connection failed.
        message: String,
    },

    /// The container runtime reported a failure.
    #[error("container runtime failed to {operation}: {message}")]
    Runtime {
        /// Operation that was attempted (e.g. "start container").
        operation: String,
        /// Diagnostic output from the runtime.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A bounded wait expired.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// The bound that expired.
        after: Duration,
    },

    /// The run context was cancelled while an operation was in flight.
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// Operation that was interrupted.
        what: String,
    },

    /// The run-wide deadline passed while an operation was in flight.
    #[error("run deadline exceeded while waiting for {what}")]
    DeadlineExceeded {
        /// Operation that was interrupted.
        what: String,
    },

    /// A container exited before its readiness condition was met.
    #[error("container {container} exited with code {code} before {waiting_for}")]
    ContainerExited {
        /// Container that exited.
        container: String,
        /// Exit code reported by the runtime.
        code: i64,
        /// Readiness condition that was never met.
        waiting_for: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A YAML configuration document could not be parsed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl ContestError {
    /// Shorthand for a [`ContestError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ContestError::Runtime`] error.
    pub fn runtime(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns whether this error was caused by cancellation or the run deadline.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ContestError>;
