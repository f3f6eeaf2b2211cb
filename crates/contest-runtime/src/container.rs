//! Fluent API for describing containers and image builds before launch.

use std::path::{Path, PathBuf};

use contest_common::error::{ContestError, Result};
use contest_common::types::{BindMount, NetworkName};

/// Everything the runtime needs to start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Unique container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command arguments passed to the image entrypoint.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Container ports published on ephemeral host ports.
    pub exposed_ports: Vec<u16>,
    /// Network to join.
    pub network: Option<NetworkName>,
    /// Aliases resolvable by other members of the network.
    pub network_aliases: Vec<String>,
    /// Bind mounts.
    pub mounts: Vec<BindMount>,
}

impl ContainerSpec {
    /// Starts a builder; the final name is `prefix` plus a random suffix.
    #[must_use]
    pub fn builder(prefix: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder::new(prefix)
    }

    /// Returns the value of an environment variable, if set.
    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Builder for [`ContainerSpec`].
#[derive(Debug)]
pub struct ContainerSpecBuilder {
    prefix: String,
    image: Option<String>,
    command: Vec<String>,
    env: Vec<(String, String)>,
    exposed_ports: Vec<u16>,
    network: Option<NetworkName>,
    network_aliases: Vec<String>,
    mounts: Vec<BindMount>,
}

impl ContainerSpecBuilder {
    /// Creates a new builder with the given name prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            image: None,
            command: Vec::new(),
            env: Vec::new(),
            exposed_ports: Vec::new(),
            network: None,
            network_aliases: Vec::new(),
            mounts: Vec::new(),
        }
    }

    /// Sets the image reference.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Appends a command argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Sets an environment variable, replacing an earlier value for the same key.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.to_string()));
        self
    }

    /// Publishes a container port on an ephemeral host port.
    #[must_use]
    pub fn expose(mut self, port: u16) -> Self {
        if !self.exposed_ports.contains(&port) {
            self.exposed_ports.push(port);
        }
        self
    }

    /// Joins the given network.
    #[must_use]
    pub fn network(mut self, network: NetworkName) -> Self {
        self.network = Some(network);
        self
    }

    /// Adds a network alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.network_aliases.contains(&alias) {
            self.network_aliases.push(alias);
        }
        self
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn mount(mut self, mount: BindMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Finishes the builder.
    ///
    /// # Errors
    ///
    /// Returns an error if no image was set, or if aliases were given
    /// without a network to scope them.
    pub fn build(self) -> Result<ContainerSpec> {
        let image = self
            .image
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| ContestError::config(format!("{}: image is required", self.prefix)))?;
        if self.network.is_none() && !self.network_aliases.is_empty() {
            return Err(ContestError::config(format!(
                "{}: network aliases require a network",
                self.prefix
            )));
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Ok(ContainerSpec {
            name: format!("{}-{}", self.prefix, &suffix[..8]),
            image,
            command: self.command,
            env: self.env,
            exposed_ports: self.exposed_ports,
            network: self.network,
            network_aliases: self.network_aliases,
            mounts: self.mounts,
        })
    }
}

/// Inputs for building an image from a local build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Build context directory.
    pub context: PathBuf,
    /// Build file, relative to the context unless absolute.
    pub dockerfile: PathBuf,
    /// Tag applied to the built image.
    pub tag: String,
}

impl BuildSpec {
    /// Creates a build spec with a unique tag derived from `prefix`.
    #[must_use]
    pub fn new(context: impl Into<PathBuf>, dockerfile: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            context: context.into(),
            dockerfile: dockerfile.into(),
            tag: format!("{prefix}:{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Build file path as seen from the current directory.
    #[must_use]
    pub fn dockerfile_path(&self) -> PathBuf {
        if self.dockerfile.is_absolute() {
            self.dockerfile.clone()
        } else {
            self.context.join(&self.dockerfile)
        }
    }

    /// Checks that the context directory and build file exist.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::NotFound`] for whichever is missing.
    pub fn check(&self) -> Result<()> {
        if !self.context.is_dir() {
            return Err(not_found("build context", &self.context));
        }
        let dockerfile = self.dockerfile_path();
        if !dockerfile.is_file() {
            return Err(not_found("build file", &dockerfile));
        }
        Ok(())
    }
}

fn not_found(kind: &'static str, path: &Path) -> ContestError {
    ContestError::NotFound {
        kind,
        id: path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkName {
        NetworkName::new("contest-test")
    }

    #[test]
    fn build_requires_image() {
        let err = ContainerSpec::builder("contest-mock")
            .build()
            .expect_err("image is required");
        assert!(err.to_string().contains("image is required"));
    }

    #[test]
    fn aliases_require_network() {
        let result = ContainerSpec::builder("contest-mock")
            .image("specmatic/enterprise")
            .alias("kafka")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn names_carry_prefix_and_are_unique() {
        let a = ContainerSpec::builder("contest-mock")
            .image("img")
            .build()
            .expect("build");
        let b = ContainerSpec::builder("contest-mock")
            .image("img")
            .build()
            .expect("build");
        assert!(a.name.starts_with("contest-mock-"));
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn env_replaces_duplicate_keys() {
        let spec = ContainerSpec::builder("contest-sut")
            .image("img")
            .env("KAFKA_PORT", 9092)
            .env("KAFKA_PORT", 19092)
            .build()
            .expect("build");
        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.env_var("KAFKA_PORT"), Some("19092"));
    }

    #[test]
    fn ports_and_aliases_are_deduplicated() {
        let spec = ContainerSpec::builder("contest-mock")
            .image("img")
            .network(network())
            .expose(9000)
            .expose(9000)
            .alias("kafka")
            .alias("kafka")
            .build()
            .expect("build");
        assert_eq!(spec.exposed_ports, vec![9000]);
        assert_eq!(spec.network_aliases, vec!["kafka"]);
    }

    #[test]
    fn build_spec_resolves_relative_dockerfile() {
        let spec = BuildSpec::new("/srv/app", "Dockerfile", "contest-sut");
        assert_eq!(spec.dockerfile_path(), PathBuf::from("/srv/app/Dockerfile"));
        assert!(spec.tag.starts_with("contest-sut:"));
    }

    #[test]
    fn build_spec_check_reports_missing_dockerfile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = BuildSpec::new(dir.path(), "Dockerfile", "contest-sut");
        let err = spec.check().expect_err("missing build file");
        assert!(matches!(err, ContestError::NotFound { kind: "build file", .. }));

        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").expect("write");
        spec.check().expect("build inputs present");
    }
}
