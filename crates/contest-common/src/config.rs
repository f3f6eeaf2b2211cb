//! Harness configuration model and loader.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables. The CLI applies its own flag overrides last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{ContestError, Result};
use crate::types::Expectation;

/// Root configuration for a contract-test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Network alias of the mock's HTTP stub.
    pub backend_host: String,
    /// Port of the mock's HTTP stub.
    pub backend_port: u16,
    /// Network alias of the emulated broker.
    pub broker_host: String,
    /// Broker data port, also the fallback when log discovery fails.
    pub broker_port: u16,
    /// Port of the mock's administrative HTTP API.
    pub broker_admin_port: u16,
    /// Port the service-under-test listens on.
    pub service_port: u16,
    /// Network alias of the service-under-test.
    pub service_alias: String,
    /// Image running the mock.
    pub mock_image: String,
    /// Image running the contract-test runner.
    pub runner_image: String,
    /// Contract specification file, relative to the working directory.
    pub contract_file: PathBuf,
    /// Local report directory, relative to the working directory.
    pub report_dir: PathBuf,
    /// Build context of the service-under-test.
    pub build_context: PathBuf,
    /// Build file of the service-under-test, relative to the build context.
    pub dockerfile: PathBuf,
    /// Messages the service must produce during the run.
    pub expectations: Vec<Expectation>,
    /// Endpoint exclusion filter passed to the runner.
    pub runner_filter: String,
    /// Upper bound on mock readiness, in seconds.
    pub mock_startup_timeout_secs: u64,
    /// Upper bound on service readiness, in seconds.
    pub service_startup_timeout_secs: u64,
    /// Upper bound on the contract-test run, in seconds.
    pub runner_timeout_secs: u64,
    /// Grace period when stopping the runner, in seconds.
    pub runner_stop_grace_secs: u64,
    /// Grace period when stopping the mock and the service, in seconds.
    pub stop_grace_secs: u64,
    /// Optional deadline for the whole run, in seconds.
    pub run_timeout_secs: Option<u64>,
    /// Interval between readiness polls, in milliseconds.
    pub log_poll_interval_ms: u64,
    /// Timeout for requests to the mock's admin API, in seconds.
    pub http_timeout_secs: u64,
    /// Log-pattern contracts.
    pub markers: LogMarkers,
}

/// Literal markers and patterns recognized in container logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogMarkers {
    /// Literal line signalling the mock is ready.
    pub mock_ready: String,
    /// Regular expression whose first capture group is the broker's external port.
    pub broker_external_port: String,
    /// Literal line signalling the service accepts connections.
    pub service_ready: String,
    /// Literal line signalling the runner finished.
    pub runner_complete: String,
}

impl Default for LogMarkers {
    fn default() -> Self {
        Self {
            mock_ready: constants::MOCK_READY_MARKER.into(),
            broker_external_port: constants::BROKER_EXTERNAL_PORT_PATTERN.into(),
            service_ready: constants::SERVICE_READY_MARKER.into(),
            runner_complete: constants::RUNNER_COMPLETE_MARKER.into(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            backend_host: "order-api".into(),
            backend_port: 8090,
            broker_host: "kafka".into(),
            broker_port: 9092,
            broker_admin_port: 9999,
            service_port: 8080,
            service_alias: "service-under-test".into(),
            mock_image: constants::DEFAULT_MOCK_IMAGE.into(),
            runner_image: constants::DEFAULT_MOCK_IMAGE.into(),
            contract_file: PathBuf::from("specmatic.yaml"),
            report_dir: PathBuf::from("build/reports"),
            build_context: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
            expectations: vec![Expectation::new("product-queries", 2)],
            runner_filter: "'/health'".into(),
            mock_startup_timeout_secs: 120,
            service_startup_timeout_secs: 60,
            runner_timeout_secs: 1800,
            runner_stop_grace_secs: 300,
            stop_grace_secs: 10,
            run_timeout_secs: None,
            log_poll_interval_ms: 500,
            http_timeout_secs: 30,
            markers: LogMarkers::default(),
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from defaults, an optional YAML file, and the
    /// process environment.
    ///
    /// An explicitly given path must exist. Without one, `contest.yaml` is
    /// read from `workdir` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// environment override is malformed.
    pub fn load(explicit: Option<&Path>, workdir: &Path) -> Result<Self> {
        let discovered = workdir.join(constants::DEFAULT_CONFIG_FILE);
        let path = explicit.or_else(|| discovered.is_file().then_some(discovered.as_path()));
        let mut config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parses a YAML configuration file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ContestError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a YAML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML or contains
    /// unknown keys.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// The port variables keep the names the containers themselves use
    /// (`BACKEND_PORT`, `KAFKA_PORT`, ...); everything else is prefixed
    /// with `CONTEST_`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let string = |key: &str, slot: &mut String| {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        };
        string("BACKEND_HOST", &mut self.backend_host);
        string("KAFKA_HOST", &mut self.broker_host);
        string("CONTEST_SERVICE_ALIAS", &mut self.service_alias);
        string("CONTEST_MOCK_IMAGE", &mut self.mock_image);
        string("CONTEST_RUNNER_IMAGE", &mut self.runner_image);
        string("CONTEST_RUNNER_FILTER", &mut self.runner_filter);

        let path = |key: &str, slot: &mut PathBuf| {
            if let Some(value) = lookup(key) {
                *slot = PathBuf::from(value);
            }
        };
        path("CONTEST_CONTRACT_FILE", &mut self.contract_file);
        path("CONTEST_REPORT_DIR", &mut self.report_dir);
        path("CONTEST_BUILD_CONTEXT", &mut self.build_context);
        path("CONTEST_DOCKERFILE", &mut self.dockerfile);

        parse_env(&lookup, "BACKEND_PORT", &mut self.backend_port)?;
        parse_env(&lookup, "KAFKA_PORT", &mut self.broker_port)?;
        parse_env(&lookup, "KAFKA_API_PORT", &mut self.broker_admin_port)?;
        parse_env(&lookup, "BFF_SERVER_PORT", &mut self.service_port)?;
        parse_env(
            &lookup,
            "CONTEST_MOCK_STARTUP_TIMEOUT_SECS",
            &mut self.mock_startup_timeout_secs,
        )?;
        parse_env(
            &lookup,
            "CONTEST_SERVICE_STARTUP_TIMEOUT_SECS",
            &mut self.service_startup_timeout_secs,
        )?;
        parse_env(&lookup, "CONTEST_RUNNER_TIMEOUT_SECS", &mut self.runner_timeout_secs)?;
        parse_env(
            &lookup,
            "CONTEST_RUNNER_STOP_GRACE_SECS",
            &mut self.runner_stop_grace_secs,
        )?;
        parse_env(&lookup, "CONTEST_HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs)?;

        if let Some(raw) = lookup("CONTEST_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = Some(parse_value("CONTEST_RUN_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("CONTEST_EXPECTED_MESSAGE_COUNT") {
            let count = parse_value("CONTEST_EXPECTED_MESSAGE_COUNT", &raw)?;
            for expectation in &mut self.expectations {
                expectation.count = count;
            }
        }
        Ok(())
    }

    /// Checks that the configuration is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, port) in [
            ("backend_port", self.backend_port),
            ("broker_port", self.broker_port),
            ("broker_admin_port", self.broker_admin_port),
            ("service_port", self.service_port),
        ] {
            if port == 0 {
                return Err(ContestError::config(format!("{name} must be non-zero")));
            }
        }
        for (name, value) in [
            ("backend_host", &self.backend_host),
            ("broker_host", &self.broker_host),
            ("service_alias", &self.service_alias),
            ("mock_image", &self.mock_image),
            ("runner_image", &self.runner_image),
        ] {
            if value.trim().is_empty() {
                return Err(ContestError::config(format!("{name} must not be empty")));
            }
        }
        if self.expectations.is_empty() {
            return Err(ContestError::config("at least one expectation is required"));
        }
        if let Some(bad) = self.expectations.iter().find(|e| e.topic.trim().is_empty()) {
            return Err(ContestError::config(format!(
                "expectation with count {} has an empty topic",
                bad.count
            )));
        }
        if self.log_poll_interval_ms == 0 {
            return Err(ContestError::config("log_poll_interval_ms must be non-zero"));
        }
        Ok(())
    }

    /// Resolves the contract file against `base` and checks it exists.
    ///
    /// The result is absolute, so it can be used as a bind-mount source.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::NotFound`] if the file is missing.
    pub fn contract_path(&self, base: &Path) -> Result<PathBuf> {
        let path = base.join(&self.contract_file);
        if !path.is_file() {
            return Err(ContestError::NotFound {
                kind: "contract file",
                id: path.display().to_string(),
            });
        }
        canonical(&path)
    }

    /// Resolves the report directory against `base`, creating it if absent.
    ///
    /// The result is absolute, so it can be used as a bind-mount source.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_report_dir(&self, base: &Path) -> Result<PathBuf> {
        let path = base.join(&self.report_dir);
        std::fs::create_dir_all(&path).map_err(|e| ContestError::Io {
            path: path.clone(),
            source: e,
        })?;
        canonical(&path)
    }

    /// Total number of messages expected across all channels.
    #[must_use]
    pub fn expected_message_count(&self) -> u64 {
        self.expectations.iter().map(|e| u64::from(e.count)).sum()
    }

    /// Bound on mock readiness.
    #[must_use]
    pub const fn mock_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.mock_startup_timeout_secs)
    }

    /// Bound on service readiness.
    #[must_use]
    pub const fn service_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.service_startup_timeout_secs)
    }

    /// Bound on the contract-test run.
    #[must_use]
    pub const fn runner_timeout(&self) -> Duration {
        Duration::from_secs(self.runner_timeout_secs)
    }

    /// Grace period for stopping the runner.
    #[must_use]
    pub const fn runner_stop_grace(&self) -> Duration {
        Duration::from_secs(self.runner_stop_grace_secs)
    }

    /// Grace period for stopping the mock and the service.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Optional deadline for the whole run.
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Interval between readiness polls.
    #[must_use]
    pub const fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }

    /// Timeout for admin API requests.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        tracing::warn!(key, value = raw, "malformed environment override");
        ContestError::config(format!("{key} has invalid value {raw:?}"))
    })
}

fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| ContestError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}
