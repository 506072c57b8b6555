//! The single job currently tracked by the client.
//!
//! Every status response is tagged with the job id it was requested for.
//! A response whose tag no longer names the tracked job is discarded, so a
//! slow reply for an abandoned job can never overwrite a newer one.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use citecheck_core::{Job, JobStatusResponse};

/// Result of [`JobTracker::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Response merged into the tracked job.
    Applied {
        /// Tracked job after the merge.
        job: Job,
        /// Whether the status moved.
        changed: bool,
    },
    /// Response was for a job that is no longer tracked.
    Discarded,
}

/// Shared handle to the tracked job.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    current: Arc<RwLock<Option<Job>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `job`, returning whatever was tracked before.
    pub async fn adopt(&self, job: Job) -> Option<Job> {
        let mut current = self.current.write().await;
        debug!(job_id = %job.id, "Tracking job");
        current.replace(job)
    }

    /// Id of the tracked job.
    pub async fn current_id(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|j| j.id.clone())
    }

    /// Copy of the tracked job.
    pub async fn snapshot(&self) -> Option<Job> {
        self.current.read().await.clone()
    }

    /// Merge a status response requested for job `tag`.
    pub async fn apply(&self, tag: &str, response: JobStatusResponse) -> ApplyOutcome {
        let mut current = self.current.write().await;
        match current.as_mut() {
            Some(job) if job.id == tag => {
                let changed = job.apply(response);
                ApplyOutcome::Applied {
                    job: job.clone(),
                    changed,
                }
            }
            other => {
                warn!(
                    tag,
                    tracked = ?other.as_ref().map(|j| j.id.as_str()),
                    "Discarding status response for untracked job"
                );
                ApplyOutcome::Discarded
            }
        }
    }

    /// Stop tracking if `tag` is still the tracked job.
    pub async fn release(&self, tag: &str) -> bool {
        let mut current = self.current.write().await;
        if current.as_ref().map(|j| j.id.as_str()) == Some(tag) {
            *current = None;
            true
        } else {
            false
        }
    }
}
