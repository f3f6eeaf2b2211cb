//! # contest-orchestrator
//!
//! Runs one contract-test cycle end to end:
//!
//! 1. provision an isolated network,
//! 2. start the dual-protocol mock and register message expectations,
//! 3. build and start the service-under-test against the mock,
//! 4. drive the contract-test runner and capture its log,
//! 5. tear everything down, verifying the messaging contract whenever the
//!    mock came up.
//!
//! All cross-phase facts live in a single [`Environment`] passed by
//! mutable reference through the phases.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod broker_port;
pub mod driver;
pub mod environment;
pub mod error;
pub mod expectations;
pub mod mock;
pub mod network;
pub mod report;
pub mod runner;
pub mod service;
pub mod teardown;

pub use driver::{Orchestrator, RunObserver};
pub use environment::{Environment, Phase};
pub use error::{OrchestratorError, Step};
pub use report::{RunReport, Verification};
