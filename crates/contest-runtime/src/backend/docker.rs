//! Backend talking to the Docker Engine API through `bollard`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::{ContainerStateStatusEnum, EndpointSettings, HostConfig, PortMap};
use bollard::network::CreateNetworkOptions;
use contest_common::error::{ContestError, Result};
use contest_common::types::{ContainerId, ContainerState, NetworkName};
use futures::{StreamExt, TryStreamExt};

use super::ContainerBackend;
use crate::container::{BuildSpec, ContainerSpec};
use crate::context::RunContext;

/// Per-request bound of the API client. Long operations (builds, graceful
/// stops) are bounded by the run context instead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Backend driving a local or remote Docker daemon over its HTTP API.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    docker: Docker,
    host: String,
}

impl DockerBackend {
    /// Connects using `DOCKER_HOST`, or the local socket when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::Unreachable`] if the client cannot be set up.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| ContestError::Unreachable {
            message: e.to_string(),
        })?;
        Ok(Self {
            docker: docker.with_timeout(CLIENT_TIMEOUT),
            host: host_from_docker_host(std::env::var("DOCKER_HOST").ok().as_deref()),
        })
    }

    /// Daemon version, if the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be queried.
    pub async fn server_version(&self, ctx: &RunContext) -> Result<String> {
        let version = api_call(ctx, "query server version", self.docker.version()).await?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn inspect(&self, ctx: &RunContext, id: &ContainerId) -> Result<bollard::models::ContainerInspectResponse> {
        api_call(
            ctx,
            "inspect container",
            self.docker
                .inspect_container(id.as_str(), None::<InspectContainerOptions>),
        )
        .await
    }
}

impl ContainerBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        let ctx = RunContext::with_timeout(Duration::from_secs(10));
        match self.server_version(&ctx).await {
            Ok(version) => {
                tracing::debug!(%version, "docker daemon reachable");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "docker daemon unreachable");
                false
            }
        }
    }

    async fn create_network(&self, ctx: &RunContext, name: &NetworkName) -> Result<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            check_duplicate: true,
            ..Default::default()
        };
        let created = api_call(ctx, "create network", self.docker.create_network(options)).await?;
        tracing::debug!(network = %name, id = ?created.id, "network created");
        Ok(())
    }

    async fn remove_network(&self, ctx: &RunContext, name: &NetworkName) -> Result<()> {
        api_call(ctx, "remove network", self.docker.remove_network(name.as_str())).await
    }

    async fn build_image(&self, ctx: &RunContext, build: &BuildSpec) -> Result<String> {
        let dockerfile = dockerfile_in_context(build)?;
        let context = build.context.clone();
        let archive = ctx
            .run("archive build context", tokio::task::spawn_blocking(move || archive_context(&context)))
            .await?
            .map_err(|e| ContestError::runtime("archive build context", e.to_string()))??;
        tracing::debug!(tag = %build.tag, bytes = archive.len(), "build context archived");

        let options = BuildImageOptions {
            dockerfile,
            t: build.tag.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };
        let build_stream = async {
            let mut stream = pin!(self.docker.build_image(options, None, Some(archive.into())));
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| api_error("build image", &e))?;
                if let Some(error) = info.error {
                    return Err(ContestError::runtime("build image", error));
                }
                if let Some(line) = info.stream.as_deref().map(str::trim_end).filter(|l| !l.is_empty()) {
                    tracing::debug!(target: "contest::build", "{line}");
                }
            }
            Ok::<(), ContestError>(())
        };
        ctx.run("build image", build_stream).await??;
        Ok(build.tag.clone())
    }

    async fn remove_image(&self, ctx: &RunContext, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        let removed = api_call(ctx, "remove image", self.docker.remove_image(image, Some(options), None)).await?;
        tracing::debug!(image, layers = removed.len(), "image removed");
        Ok(())
    }

    async fn start(&self, ctx: &RunContext, spec: &ContainerSpec) -> Result<ContainerId> {
        let config = container_config(spec)?;
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created =
            api_call(ctx, "create container", self.docker.create_container(Some(options), config)).await?;
        for warning in &created.warnings {
            tracing::warn!(container = %spec.name, "{warning}");
        }
        let id = ContainerId::new(created.id);

        let started = api_call(
            ctx,
            "start container",
            self.docker
                .start_container(id.as_str(), None::<StartContainerOptions<String>>),
        )
        .await;
        if let Err(e) = started {
            if let Err(cleanup) = self.remove(&ctx.detached(), &id).await {
                tracing::warn!(container = %spec.name, error = %cleanup, "failed to remove unstarted container");
            }
            return Err(e);
        }
        Ok(id)
    }

    async fn mapped_port(&self, ctx: &RunContext, id: &ContainerId, container_port: u16) -> Result<u16> {
        let inspected = self.inspect(ctx, id).await?;
        inspected
            .network_settings
            .and_then(|n| n.ports)
            .and_then(|ports| published_port(&ports, container_port))
            .ok_or_else(|| ContestError::NotFound {
                kind: "port mapping",
                id: format!("{}:{container_port}", id.short()),
            })
    }

    async fn host(&self, _ctx: &RunContext, _id: &ContainerId) -> Result<String> {
        Ok(self.host.clone())
    }

    async fn logs(&self, ctx: &RunContext, id: &ContainerId) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let chunks: Vec<_> = api_call(
            ctx,
            "read container logs",
            self.docker.logs(id.as_str(), Some(options)).try_collect(),
        )
        .await?;
        Ok(chunks
            .into_iter()
            .map(|chunk| String::from_utf8_lossy(&chunk.into_bytes()).into_owned())
            .collect())
    }

    async fn state(&self, ctx: &RunContext, id: &ContainerId) -> Result<ContainerState> {
        let inspected = self.inspect(ctx, id).await?;
        let state = inspected.state.unwrap_or_default();
        Ok(lifecycle_state(state.status, state.exit_code))
    }

    async fn stop(&self, ctx: &RunContext, id: &ContainerId, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        let stopped = ctx
            .run("stop container", self.docker.stop_container(id.as_str(), Some(options)))
            .await?;
        match stopped {
            Ok(()) => Ok(()),
            Err(e) if status_of(&e) == Some(304) => Ok(()),
            Err(e) => Err(api_error("stop container", &e)),
        }
    }

    async fn remove(&self, ctx: &RunContext, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        let removed = ctx
            .run("remove container", self.docker.remove_container(id.as_str(), Some(options)))
            .await?;
        match removed {
            Ok(()) => Ok(()),
            Err(e) if status_of(&e) == Some(404) => {
                tracing::debug!(container = %id.short(), "container already gone");
                Ok(())
            }
            Err(e) => Err(api_error("remove container", &e)),
        }
    }
}

/// Runs an API request under `ctx`, mapping engine errors to runtime errors.
async fn api_call<T>(
    ctx: &RunContext,
    operation: &str,
    fut: impl Future<Output = std::result::Result<T, DockerError>>,
) -> Result<T> {
    ctx.run(operation, fut)
        .await?
        .map_err(|e| api_error(operation, &e))
}

fn status_of(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn api_error(operation: &str, err: &DockerError) -> ContestError {
    match err {
        DockerError::DockerResponseServerError { message, .. } => ContestError::runtime(operation, message.clone()),
        other => ContestError::runtime(operation, other.to_string()),
    }
}

/// Create-container body for `spec`.
///
/// Every exposed port is published on an ephemeral host port. Bind-mount
/// sources must be absolute; the engine reads anything else as a named
/// volume.
fn container_config(spec: &ContainerSpec) -> Result<Config<String>> {
    let binds = spec
        .mounts
        .iter()
        .map(|mount| {
            if !mount.host.is_absolute() {
                return Err(ContestError::config(format!(
                    "bind mount source {} must be an absolute path",
                    mount.host.display()
                )));
            }
            let mode = if mount.read_only { ":ro" } else { "" };
            Ok(format!("{}:{}{mode}", mount.host.display(), mount.container))
        })
        .collect::<Result<Vec<_>>>()?;

    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (format!("{port}/tcp"), HashMap::new()))
        .collect();

    let networking_config = spec.network.as_ref().map(|network| NetworkingConfig {
        endpoints_config: HashMap::from([(
            network.to_string(),
            EndpointSettings {
                aliases: Some(spec.network_aliases.clone()),
                ..Default::default()
            },
        )]),
    });

    Ok(Config {
        image: Some(spec.image.clone()),
        cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            binds: Some(binds),
            publish_all_ports: Some(true),
            network_mode: spec.network.as_ref().map(ToString::to_string),
            ..Default::default()
        }),
        networking_config,
        ..Default::default()
    })
}

/// First host port published for `container_port/tcp`.
fn published_port(ports: &PortMap, container_port: u16) -> Option<u16> {
    ports
        .get(&format!("{container_port}/tcp"))?
        .as_ref()?
        .iter()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

fn lifecycle_state(status: Option<ContainerStateStatusEnum>, exit_code: Option<i64>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::PAUSED | ContainerStateStatusEnum::RESTARTING) => {
            ContainerState::Running
        }
        Some(ContainerStateStatusEnum::EXITED | ContainerStateStatusEnum::DEAD | ContainerStateStatusEnum::REMOVING) => {
            ContainerState::Exited {
                code: exit_code.unwrap_or(0),
            }
        }
        _ => ContainerState::Created,
    }
}

/// Build file path inside the archived context.
fn dockerfile_in_context(build: &BuildSpec) -> Result<String> {
    let relative = if build.dockerfile.is_absolute() {
        build
            .dockerfile
            .strip_prefix(&build.context)
            .map_err(|_| {
                ContestError::config(format!(
                    "build file {} is outside the build context {}",
                    build.dockerfile.display(),
                    build.context.display()
                ))
            })?
            .to_path_buf()
    } else {
        build.dockerfile.clone()
    };
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// Packs the build context into an uncompressed tar archive.
fn archive_context(context: &Path) -> Result<Vec<u8>> {
    let io_error = |source| ContestError::Io {
        path: PathBuf::from(context),
        source,
    };
    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);
    archive.append_dir_all(".", context).map_err(io_error)?;
    archive.into_inner().map_err(io_error)
}

/// Host where published ports are reachable, derived from `DOCKER_HOST`.
///
/// TCP daemons publish on the daemon's host; local sockets publish on
/// `localhost`.
fn host_from_docker_host(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|value| {
            let rest = value
                .strip_prefix("tcp://")
                .or_else(|| value.strip_prefix("http://"))
                .or_else(|| value.strip_prefix("https://"))?;
            let authority = rest.split('/').next().unwrap_or(rest);
            let host = match authority.strip_prefix('[') {
                Some(v6) => v6.split(']').next().unwrap_or(v6),
                None => authority.rsplit_once(':').map_or(authority, |(h, _)| h),
            };
            (!host.is_empty()).then(|| host.to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
