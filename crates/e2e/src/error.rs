//! Error types for the HMR harness

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Fixture not found: {}", .0.display())]
    FixtureNotFound(PathBuf),

    #[error("Could not clear leftover workspace {}: {source}", .path.display())]
    StaleWorkspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dependency install `{command}` failed ({status}): {stderr_tail}")]
    Install {
        command: String,
        status: String,
        stderr_tail: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dev server for {integration} exited before it was ready ({status}): {stderr_tail}")]
    ServerExited {
        integration: String,
        status: String,
        stderr_tail: String,
    },

    #[error(
        "Dev server for {integration} did not print its ready line within {timeout_ms} ms; \
         last output: {recent_output}"
    )]
    ReadyTimeout {
        integration: String,
        timeout_ms: u64,
        recent_output: String,
    },

    #[error("Dev server at {url} did not answer HTTP within {timeout_ms} ms")]
    ServerUnreachable { url: String, timeout_ms: u64 },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error(
        "Expected {expected} but last observed {last_observed} after {elapsed_ms} ms \
         ({attempts} attempts)"
    )]
    AssertionTimeout {
        expected: String,
        last_observed: String,
        elapsed_ms: u64,
        attempts: u32,
    },

    #[error("Invalid suite state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("Suite timed out after {seconds}s")]
    SuiteTimeout { seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<chromiumoxide::error::CdpError> for HarnessError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        HarnessError::Browser(e.to_string())
    }
}

impl HarnessError {
    /// Whether this error means the suite could not reach a runnable state.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::FixtureNotFound(_)
                | HarnessError::StaleWorkspace { .. }
                | HarnessError::Install { .. }
                | HarnessError::Spawn { .. }
                | HarnessError::ServerExited { .. }
                | HarnessError::ReadyTimeout { .. }
                | HarnessError::ServerUnreachable { .. }
                | HarnessError::SuiteTimeout { .. }
        )
    }

    /// Whether the shared page can no longer be trusted after this error.
    /// Assertion misses leave the session intact; transport failures do not.
    pub fn breaks_session(&self) -> bool {
        matches!(self, HarnessError::Browser(_) | HarnessError::InvalidState { .. })
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
