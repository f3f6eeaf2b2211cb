//! System-wide constants: images, container paths, log markers, and
//! environment variable names exchanged with the containers.

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "contest.yaml";

/// Prefix for per-run network names.
pub const NETWORK_PREFIX: &str = "contest";

/// Name prefix of the mock container.
pub const MOCK_CONTAINER_PREFIX: &str = "contest-mock";

/// Name prefix of the service-under-test container.
pub const SERVICE_CONTAINER_PREFIX: &str = "contest-sut";

/// Name prefix of the contract-test runner container.
pub const RUNNER_CONTAINER_PREFIX: &str = "contest-runner";

/// File in the report directory receiving the runner's captured log.
pub const RUNNER_LOG_FILE: &str = "contest-runner.log";

/// Prefix for images built from the service-under-test's build context.
pub const SERVICE_IMAGE_PREFIX: &str = "contest-sut";

/// Image running both the mock and the contract-test runner.
pub const DEFAULT_MOCK_IMAGE: &str = "specmatic/enterprise";

/// Command selecting the mock mode of the image.
pub const MOCK_COMMAND: &str = "mock";

/// Command selecting the contract-test mode of the image.
pub const RUNNER_COMMAND: &str = "test";

/// Contract specification path inside the mock and runner containers.
pub const CONTAINER_CONTRACT_PATH: &str = "/usr/src/app/specmatic.yaml";

/// Report directory inside the mock container.
pub const MOCK_REPORT_PATH: &str = "/usr/src/app/build/reports/specmatic";

/// Report directory inside the runner container.
pub const RUNNER_REPORT_PATH: &str = "/usr/src/app/build/reports";

/// Log line emitted once the mock has started both of its protocols.
pub const MOCK_READY_MARKER: &str = "AsyncMock has started";

/// Pattern recovering the broker's externally advertised port from the mock log.
pub const BROKER_EXTERNAL_PORT_PATTERN: &str = r"EXTERNAL://0\.0\.0\.0:(\d+)";

/// Log line emitted once the service-under-test accepts connections.
pub const SERVICE_READY_MARKER: &str = "Listening and serving";

/// Log line prefixing the runner's results summary.
pub const RUNNER_COMPLETE_MARKER: &str = "Passed Tests:";

/// Mock admin API path for registering expectations.
pub const EXPECTATIONS_PATH: &str = "/_expectations";

/// Mock admin API path for fetching the verification verdict.
pub const VERIFICATION_PATH: &str = "/_expectations/verification_status";

/// Environment variable names injected into the mock container.
pub mod mock_env {
    /// Broker host advertised to clients.
    pub const EXTERNAL_HOST: &str = "KAFKA_EXTERNAL_HOST";
    /// Broker port advertised to clients.
    pub const EXTERNAL_PORT: &str = "KAFKA_EXTERNAL_PORT";
    /// Port of the mock's administrative HTTP API.
    pub const API_SERVER_PORT: &str = "API_SERVER_PORT";
}

/// Environment variable names injected into the service-under-test.
pub mod service_env {
    /// Port of the downstream HTTP dependency.
    pub const DOMAIN_SERVER_PORT: &str = "DOMAIN_SERVER_PORT";
    /// Host of the downstream HTTP dependency.
    pub const DOMAIN_SERVER_HOST: &str = "DOMAIN_SERVER_HOST";
    /// Broker port.
    pub const BROKER_PORT: &str = "KAFKA_PORT";
    /// Broker host.
    pub const BROKER_HOST: &str = "KAFKA_HOST";
}

/// Environment variable names injected into the contract-test runner.
pub mod runner_env {
    /// Enables generative tests.
    pub const GENERATIVE_TESTS: &str = "SPECMATIC_GENERATIVE_TESTS";
    /// Endpoint filter expression.
    pub const FILTER: &str = "FILTER";
    /// Base URL of the service-under-test.
    pub const APP_URL: &str = "APP_URL";
}
