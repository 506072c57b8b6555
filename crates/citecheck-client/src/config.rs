//! Client configuration.
//!
//! Configuration is loaded from environment variables (`CITECHECK_*`
//! prefixed) with defaults from [`citecheck_core::defaults`].
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CITECHECK_API_URL` | `http://127.0.0.1:8000` | Validation backend base URL |
//! | `CITECHECK_REQUEST_TIMEOUT_SECS` | `20` | Per-request HTTP timeout |
//! | `CITECHECK_SUBMIT_MODE` | `async` | `sync` or `async` submission endpoint |
//! | `CITECHECK_USER_TOKEN` | unset | Token sent as `X-User-Token` |

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use citecheck_core::defaults;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid submit mode: {0}")]
    InvalidSubmitMode(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for citecheck_core::Error {
    fn from(e: ConfigError) -> Self {
        citecheck_core::Error::Config(e.to_string())
    }
}

/// Which submission endpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    /// `POST /api/validate`, results in the response.
    Sync,
    /// `POST /api/validate/async`, results via job polling.
    #[default]
    Async,
}

impl FromStr for SubmitMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            _ => Err(ConfigError::InvalidSubmitMode(s.to_string())),
        }
    }
}

impl fmt::Display for SubmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// Validation backend client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the validation backend.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    pub submit_mode: SubmitMode,
    /// Token for endpoints that require `X-User-Token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_URL.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            submit_mode: SubmitMode::default(),
            user_token: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        Self {
            base_url: lookup("CITECHECK_API_URL").unwrap_or(base.base_url),
            request_timeout_secs: lookup("CITECHECK_REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.request_timeout_secs),
            submit_mode: lookup("CITECHECK_SUBMIT_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.submit_mode),
            user_token: lookup("CITECHECK_USER_TOKEN").filter(|t| !t.is_empty()),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.submit_mode = mode;
        self
    }

    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        self.user_token = Some(token.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "base_url cannot be empty".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
