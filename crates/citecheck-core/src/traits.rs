//! Core traits for citecheck abstractions.
//!
//! Storage and the validation backend sit behind these traits so the job
//! orchestration can be driven by in-memory fakes in tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AsyncSubmission, JobStatusResponse, SyncValidation, UpgradeEvent, ValidationRequest,
};

// =============================================================================
// STORAGE
// =============================================================================

/// Durable client-side key/value storage for job ids and experiment arms.
///
/// Each key is mutated by exactly one component. Operations are synchronous
/// so cleanup can run from drop guards on every exit path.
pub trait JobStore: Send + Sync {
    /// Read a key. Returns `None` if it was never set or cannot be read back.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Clearing an absent key is a no-op.
    fn clear(&self, key: &str) -> Result<()>;

    /// Remove a key only if it still holds `expected`.
    ///
    /// Returns `true` if the key was removed. Implementations should make the
    /// check and the removal a single step.
    fn clear_if(&self, key: &str, expected: &str) -> Result<bool> {
        if self.get(key)?.as_deref() == Some(expected) {
            self.clear(key)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// =============================================================================
// VALIDATION BACKEND
// =============================================================================

/// Client for the citation validation backend.
#[async_trait]
pub trait ValidationTransport: Send + Sync {
    /// `POST /api/validate`: validate synchronously.
    async fn validate(&self, request: &ValidationRequest) -> Result<SyncValidation>;

    /// `POST /api/validate/async`: enqueue a validation job.
    async fn submit(&self, request: &ValidationRequest) -> Result<AsyncSubmission>;

    /// `GET /api/jobs/{job_id}`: fetch job status and any results.
    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse>;

    /// `POST /api/upgrade-event`: record a completed upgrade for a job.
    async fn report_upgrade(&self, user_token: &str, event: &UpgradeEvent) -> Result<()>;
}
