//! HTTP client for the mock's expectation admin API.
//!
//! Registration happens before any traffic flows; verification happens
//! during teardown. The client is stateless between the two calls.

use std::time::Duration;

use contest_common::constants::{EXPECTATIONS_PATH, VERIFICATION_PATH};
use contest_common::error::ContestError;
use contest_common::types::Expectation;
use contest_runtime::context::RunContext;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failures talking to the admin API or reported by it.
///
/// Every variant means "verification failed" to the caller;
/// [`ExpectationError::discrepancies`] surfaces whatever details the mock
/// returned.
#[derive(Debug, Error)]
pub enum ExpectationError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Builder error text.
        message: String,
    },

    /// The request did not complete.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Target URL.
        url: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The mock answered with a non-success status.
    #[error("{url} answered {status}: {body}")]
    Rejected {
        /// Target URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body was not the expected shape.
    #[error("malformed response from {url}: {message}")]
    Malformed {
        /// Target URL.
        url: String,
        /// What was wrong with the body.
        message: String,
    },

    /// The mock reported unmet expectations.
    #[error("expectations not met: {}", render_errors(.errors))]
    Unmet {
        /// Discrepancies reported by the mock.
        errors: Vec<String>,
    },

    /// The run context was cancelled or expired mid-request.
    #[error(transparent)]
    Interrupted(#[from] ContestError),
}

impl ExpectationError {
    /// Discrepancies reported by the mock, if it sent any.
    #[must_use]
    pub fn discrepancies(&self) -> &[String] {
        match self {
            Self::Unmet { errors } => errors,
            _ => &[],
        }
    }
}

fn render_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        "no details reported".to_string()
    } else {
        errors.join("; ")
    }
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    expectations: &'a [Expectation],
}

#[derive(Debug, Deserialize)]
struct VerdictBody {
    success: bool,
    #[serde(default)]
    errors: Vec<Value>,
}

/// Client bound to one mock's admin endpoint.
#[derive(Debug, Clone)]
pub struct ExpectationClient {
    base_url: String,
    client: Client,
}

impl ExpectationClient {
    /// Creates a client for the admin API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpectationError::Client`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExpectationError> {
        let mut base_url = base_url.into();
        let trimmed_len = base_url.trim_end_matches('/').len();
        base_url.truncate(trimmed_len);
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ExpectationError::Client { message: e.to_string() })?;
        Ok(Self { base_url, client })
    }

    /// Admin API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Registers `expectations` with the mock.
    ///
    /// Success only means the mock accepted the request.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx answer.
    pub async fn register(&self, ctx: &RunContext, expectations: &[Expectation]) -> Result<(), ExpectationError> {
        let url = format!("{}{EXPECTATIONS_PATH}", self.base_url);
        tracing::debug!(%url, count = expectations.len(), "registering expectations");
        let request = self.client.post(&url).json(&RegisterBody { expectations }).send();
        let response = ctx
            .run("expectation registration", request)
            .await?
            .map_err(|source| ExpectationError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = ctx
            .run("expectation registration", response.text())
            .await?
            .unwrap_or_default();
        Err(ExpectationError::Rejected {
            url,
            status: status.as_u16(),
            body,
        })
    }

    /// Asks the mock whether every registered expectation was met.
    ///
    /// # Errors
    ///
    /// Returns [`ExpectationError::Unmet`] with the mock's discrepancies
    /// when it reports failure, and a transport or shape error otherwise.
    pub async fn verify(&self, ctx: &RunContext) -> Result<(), ExpectationError> {
        let url = format!("{}{VERIFICATION_PATH}", self.base_url);
        tracing::debug!(%url, "fetching verification status");
        let transport = |source| ExpectationError::Transport {
            url: url.clone(),
            source,
        };
        let response = ctx
            .run("expectation verification", self.client.get(&url).send())
            .await?
            .map_err(transport)?;
        let status = response.status().as_u16();
        let body = ctx
            .run("expectation verification", response.text())
            .await?
            .map_err(transport)?;
        parse_verification(&url, status, &body)
    }
}

/// Interprets a verification response.
///
/// A parseable failure verdict wins over the status code so discrepancies
/// are never lost.
///
/// # Errors
///
/// Returns the failure the response represents.
pub fn parse_verification(url: &str, status: u16, body: &str) -> Result<(), ExpectationError> {
    let ok_status = (200..300).contains(&status);
    match serde_json::from_str::<VerdictBody>(body) {
        Ok(verdict) if verdict.success && ok_status => Ok(()),
        Ok(verdict) if !verdict.success => Err(ExpectationError::Unmet {
            errors: verdict.errors.into_iter().map(render_value).collect(),
        }),
        Ok(_) | Err(_) if !ok_status => Err(ExpectationError::Rejected {
            url: url.to_string(),
            status,
            body: body.to_string(),
        }),
        Ok(_) => Err(ExpectationError::Malformed {
            url: url.to_string(),
            message: "unexpected verdict".to_string(),
        }),
        Err(e) => Err(ExpectationError::Malformed {
            url: url.to_string(),
            message: e.to_string(),
        }),
    }
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
