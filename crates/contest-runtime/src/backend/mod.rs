//! Container backend abstraction.

pub mod docker;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

use std::future::Future;
use std::time::Duration;

use contest_common::error::Result;
use contest_common::types::{ContainerId, ContainerState, NetworkName};

use crate::container::{BuildSpec, ContainerSpec};
use crate::context::RunContext;

/// Platform-agnostic container runtime.
///
/// Implementors handle the details of networking, image builds, port
/// mapping, and log retrieval. Every potentially blocking call receives
/// the run context and must return promptly once it is cancelled.
pub trait ContainerBackend: Send + Sync {
    /// Short backend name for log output.
    fn name(&self) -> &'static str;

    /// Returns whether the runtime is reachable.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Creates an isolated network.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot allocate the network.
    fn create_network(
        &self,
        ctx: &RunContext,
        name: &NetworkName,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Removes a network created by [`ContainerBackend::create_network`].
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be removed.
    fn remove_network(
        &self,
        ctx: &RunContext,
        name: &NetworkName,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Builds an image, returning the reference to start it by.
    ///
    /// # Errors
    ///
    /// Returns an error if the build fails.
    fn build_image(
        &self,
        ctx: &RunContext,
        build: &BuildSpec,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Removes an image produced by [`ContainerBackend::build_image`].
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be removed.
    fn remove_image(&self, ctx: &RunContext, image: &str) -> impl Future<Output = Result<()>> + Send;

    /// Creates and starts a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created or started.
    fn start(
        &self,
        ctx: &RunContext,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<ContainerId>> + Send;

    /// Host port bound to `container_port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not published.
    fn mapped_port(
        &self,
        ctx: &RunContext,
        id: &ContainerId,
        container_port: u16,
    ) -> impl Future<Output = Result<u16>> + Send;

    /// Host address where published ports are reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be determined.
    fn host(&self, ctx: &RunContext, id: &ContainerId) -> impl Future<Output = Result<String>> + Send;

    /// Everything the container has logged so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the log stream cannot be read.
    fn logs(&self, ctx: &RunContext, id: &ContainerId) -> impl Future<Output = Result<String>> + Send;

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    fn state(
        &self,
        ctx: &RunContext,
        id: &ContainerId,
    ) -> impl Future<Output = Result<ContainerState>> + Send;

    /// Stops a container, killing it once `grace` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    fn stop(
        &self,
        ctx: &RunContext,
        id: &ContainerId,
        grace: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Removes a container and its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn remove(&self, ctx: &RunContext, id: &ContainerId) -> impl Future<Output = Result<()>> + Send;
}
