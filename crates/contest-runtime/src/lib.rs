//! Container runtime capability for the contest harness.
//!
//! The orchestrator consumes containers, networks, port mappings, and log
//! streams through the [`ContainerBackend`](backend::ContainerBackend)
//! trait. Every blocking call is raced against a
//! [`RunContext`](context::RunContext) so cancellation and the run
//! deadline interrupt in-flight waits.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod container;
pub mod context;
pub mod logs;
