//! Recovers the broker's externally advertised port from mock log text.
//!
//! The mock has no structured discovery API for this value, so it is
//! scraped from its startup log. Everything format-specific lives here.

use contest_common::error::{ContestError, Result};
use regex::Regex;

/// Compiled pattern whose first capture group is the port number.
#[derive(Debug, Clone)]
pub struct BrokerPortPattern {
    regex: Regex,
}

impl BrokerPortPattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pattern does not compile or
    /// has no capture group.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| ContestError::config(format!("invalid broker port pattern {pattern:?}: {e}")))?;
        if regex.captures_len() < 2 {
            return Err(ContestError::config(format!(
                "broker port pattern {pattern:?} must capture the port in a group"
            )));
        }
        Ok(Self { regex })
    }

    /// Pattern source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Returns the first port captured by `pattern` in `text`.
///
/// Captures that are not a valid non-zero port are skipped.
#[must_use]
pub fn extract_external_port(pattern: &BrokerPortPattern, text: &str) -> Option<u16> {
    pattern
        .regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse::<u16>().ok())
        .find(|port| *port != 0)
}

/// Picks the discovered port, or `fallback` when discovery failed.
#[must_use]
pub fn resolve_broker_port(discovered: Option<u16>, fallback: u16) -> u16 {
    discovered.unwrap_or(fallback)
}
