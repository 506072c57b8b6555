//! Batch submission.

use std::sync::Arc;

use tracing::{debug, info};

use citecheck_client::SubmitMode;
use citecheck_core::defaults::KEY_CURRENT_JOB_ID;
use citecheck_core::{
    CitationBatch, JobStore, Result, SyncValidation, ValidationRequest, ValidationTransport,
};

/// Result of a submission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Results returned inline by the synchronous endpoint.
    Completed(SyncValidation),
    /// Job enqueued; `current_job_id` has already been persisted.
    Queued {
        job_id: String,
        experiment_variant: Option<u32>,
    },
}

/// Sends citation batches to the backend.
pub struct JobSubmitter {
    transport: Arc<dyn ValidationTransport>,
    store: Arc<dyn JobStore>,
    mode: SubmitMode,
}

impl JobSubmitter {
    pub fn new(
        transport: Arc<dyn ValidationTransport>,
        store: Arc<dyn JobStore>,
        mode: SubmitMode,
    ) -> Self {
        Self {
            transport,
            store,
            mode,
        }
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    /// Submit `batch`.
    ///
    /// On the async path the returned job id is written to durable storage
    /// before this returns, so a crash right after submission can still
    /// resume the job.
    pub async fn submit(
        &self,
        batch: &CitationBatch,
        model_preference: Option<String>,
    ) -> Result<Submission> {
        batch.validate()?;
        let request = ValidationRequest::from_batch(batch, model_preference);

        match self.mode {
            SubmitMode::Sync => {
                let result = self.transport.validate(&request).await?;
                info!(
                    citation_count = request.citations.len(),
                    result_count = result.results.len(),
                    "Synchronous validation returned"
                );
                Ok(Submission::Completed(result))
            }
            SubmitMode::Async => {
                let accepted = self.transport.submit(&request).await?;
                self.store.set(KEY_CURRENT_JOB_ID, &accepted.job_id)?;
                debug!(job_id = %accepted.job_id, "Persisted current job id");
                info!(
                    job_id = %accepted.job_id,
                    citation_count = request.citations.len(),
                    experiment_variant = ?accepted.experiment_variant,
                    "Validation job enqueued"
                );
                Ok(Submission::Queued {
                    job_id: accepted.job_id,
                    experiment_variant: accepted.experiment_variant,
                })
            }
        }
    }
}
