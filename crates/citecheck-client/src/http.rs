//! reqwest-based validation backend transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use citecheck_core::{
    AsyncSubmission, Error, JobStatusResponse, Result, SyncValidation, UpgradeEvent,
    ValidationRequest, ValidationTransport,
};

use crate::config::ClientConfig;
use crate::error::{to_citecheck_error, BackendErrorBody, BackendErrorCode};

/// HTTP client for the validation backend.
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Create a new transport with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            timeout_secs = config.request_timeout_secs,
            submit_mode = %config.submit_mode,
            "Initializing validation transport"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// Status URL for `job_id`, escaped as a single path segment.
    fn job_url(&self, job_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("/api/jobs"))
            .map_err(|e| Error::Config(format!("Invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                Error::Config(format!(
                    "Base URL cannot hold a path: {}",
                    self.config.base_url
                ))
            })?
            .push(job_id);
        Ok(url)
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .post(self.url(endpoint))
            .header("Content-Type", "application/json")
    }

    /// Map a transport failure.
    ///
    /// A timed-out status request for a known job is a [`Error::Timeout`];
    /// everything else is a retryable [`Error::Network`].
    fn send_error(&self, e: reqwest::Error, job_id: Option<&str>) -> Error {
        match job_id {
            Some(id) if e.is_timeout() => Error::Timeout {
                job_id: id.to_string(),
                after_ms: self.config.request_timeout_secs * 1000,
            },
            _ => Error::from(e),
        }
    }

    /// Turn a non-success response into a mapped error.
    async fn error_from(response: Response, job_id: Option<&str>) -> Error {
        let status = response.status().as_u16();
        let body: BackendErrorBody = response.json().await.unwrap_or_default();
        let message = body.message();
        let code = BackendErrorCode::from_status(status);
        if code.is_retryable() {
            warn!(status, %message, "Backend returned retryable error");
        } else {
            debug!(status, %message, "Backend rejected request");
        }
        to_citecheck_error(code, status, &message, job_id)
    }

    /// Check status and decode a JSON body.
    ///
    /// A 2xx body that fails to decode is a [`Error::MalformedResponse`].
    async fn decode<T: DeserializeOwned>(response: Response, job_id: Option<&str>) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::error_from(response, job_id).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::MalformedResponse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl ValidationTransport for HttpTransport {
    async fn validate(&self, request: &ValidationRequest) -> Result<SyncValidation> {
        let start = Instant::now();
        debug!(
            citation_count = request.citations.len(),
            style = %request.style,
            "Validating synchronously"
        );

        let response = self.post("/api/validate").json(request).send().await?;
        let result: SyncValidation = Self::decode(response, None).await?;

        debug!(
            result_count = result.results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Synchronous validation complete"
        );
        Ok(result)
    }

    async fn submit(&self, request: &ValidationRequest) -> Result<AsyncSubmission> {
        debug!(
            citation_count = request.citations.len(),
            style = %request.style,
            "Submitting async validation"
        );

        let response = self.post("/api/validate/async").json(request).send().await?;
        let submission: AsyncSubmission = Self::decode(response, None).await?;

        if submission.job_id.is_empty() {
            return Err(Error::MalformedResponse(
                "async submission returned an empty job_id".to_string(),
            ));
        }
        Ok(submission)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse> {
        let response = self
            .client
            .get(self.job_url(job_id)?)
            .send()
            .await
            .map_err(|e| self.send_error(e, Some(job_id)))?;
        let status: JobStatusResponse = Self::decode(response, Some(job_id)).await?;
        status.validate()?;
        Ok(status)
    }

    async fn report_upgrade(&self, user_token: &str, event: &UpgradeEvent) -> Result<()> {
        let response = self
            .post("/api/upgrade-event")
            .header("X-User-Token", user_token)
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, None).await);
        }
        debug!(job_id = %event.job_id, "Upgrade event recorded");
        Ok(())
    }
}
