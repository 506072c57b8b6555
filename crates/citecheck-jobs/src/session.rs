//! One user's validation session.
//!
//! Ties submission, polling, experiment assignment, and upgrade tracking
//! together and keeps at most one job under active polling.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use citecheck_client::SubmitMode;
use citecheck_core::defaults::KEY_CURRENT_JOB_ID;
use citecheck_core::{
    evaluate, reconcile, CitationBatch, Error, GatingInput, GatingSummary, InlineInput, Job,
    JobStatus, JobStore, Reconciliation, Result, SyncValidation, UserStatus, ValidationTransport,
    MODEL_PREFERENCE,
};

use crate::experiment::ExperimentAssigner;
use crate::poller::{CancelReason, JobPoller, PollConfig, PollHandle, PollOutcome, PollerEvent};
use crate::submitter::{JobSubmitter, Submission};
use crate::tracker::JobTracker;
use crate::upgrade::{UpgradeCompletion, UpgradeTracker};

/// Display-ready state of a job's results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationView {
    /// Backend job id; `None` for synchronous results.
    pub job_id: Option<String>,
    pub status: JobStatus,
    #[serde(flatten)]
    pub reconciliation: Reconciliation,
    pub summary: GatingSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_status: Option<UserStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_variant: Option<u32>,
}

impl ValidationView {
    pub fn from_job(job: &Job, revealed: bool) -> Self {
        let references = Some(job.results.as_slice());
        let inline = InlineInput::infer(job.inline_results.as_deref(), references);
        Self {
            job_id: (!job.id.is_empty()).then(|| job.id.clone()),
            status: job.status,
            reconciliation: reconcile(references, inline, job.orphans.as_deref()),
            summary: evaluate(&GatingInput::from_job(job, revealed)),
            user_status: job.user_status.clone(),
            experiment_variant: job.experiment_variant,
        }
    }
}

/// Result of [`ValidationSession::submit`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Synchronous results, ready to show.
    Completed(ValidationView),
    /// Job enqueued and being polled.
    Queued {
        job_id: String,
        experiment_variant: Option<u32>,
    },
}

/// Synchronous results carry no backend id.
fn job_from_sync(result: SyncValidation, submitted: usize) -> Job {
    let mut job = Job::new(String::new(), submitted);
    job.status = JobStatus::Completed;
    job.processed_count = result.results.len();
    job.results = result.results;
    job.inline_results = result.inline_results;
    job.orphans = result.orphans;
    job.user_status = result.user_status;
    job.results_gated = result.results_gated;
    job
}

/// Builder for [`ValidationSession`].
pub struct SessionBuilder {
    transport: Arc<dyn ValidationTransport>,
    store: Arc<dyn JobStore>,
    submit_mode: SubmitMode,
    poll_config: PollConfig,
    seed: Option<u64>,
}

impl SessionBuilder {
    pub fn new(transport: Arc<dyn ValidationTransport>, store: Arc<dyn JobStore>) -> Self {
        Self {
            transport,
            store,
            submit_mode: SubmitMode::default(),
            poll_config: PollConfig::default(),
            seed: None,
        }
    }

    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.submit_mode = mode;
        self
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    /// Seed experiment draws, for reproducible runs.
    pub fn with_experiment_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> ValidationSession {
        let experiments = match self.seed {
            Some(seed) => ExperimentAssigner::with_seed(self.store.clone(), seed),
            None => ExperimentAssigner::new(self.store.clone()),
        };
        let upgrades = UpgradeTracker::new(self.transport.clone(), self.store.clone());
        ValidationSession {
            submitter: JobSubmitter::new(
                self.transport.clone(),
                self.store.clone(),
                self.submit_mode,
            ),
            poller: JobPoller::new(
                self.transport.clone(),
                self.store.clone(),
                JobTracker::new(),
                self.poll_config,
            )
            .with_upgrades(upgrades.clone()),
            upgrades,
            experiments,
            store: self.store,
            active: Mutex::new(None),
            revealed: Mutex::new(None),
        }
    }
}

/// Submission and tracking for one user.
pub struct ValidationSession {
    submitter: JobSubmitter,
    poller: JobPoller,
    upgrades: UpgradeTracker,
    experiments: ExperimentAssigner,
    store: Arc<dyn JobStore>,
    active: Mutex<Option<PollHandle>>,
    revealed: Mutex<Option<String>>,
}

impl ValidationSession {
    pub fn builder(
        transport: Arc<dyn ValidationTransport>,
        store: Arc<dyn JobStore>,
    ) -> SessionBuilder {
        SessionBuilder::new(transport, store)
    }

    pub fn experiments(&self) -> &ExperimentAssigner {
        &self.experiments
    }

    pub fn upgrades(&self) -> &UpgradeTracker {
        &self.upgrades
    }

    /// Get a receiver for poller events.
    pub fn events(&self) -> broadcast::Receiver<PollerEvent> {
        self.poller.events()
    }

    /// Submit a batch.
    ///
    /// Once the backend accepts it, any job still being polled is cancelled
    /// before the new one is adopted, so its late replies can no longer touch
    /// the new job. A rejected submission leaves the previous job running.
    pub async fn submit(&self, batch: &CitationBatch) -> Result<SubmitOutcome> {
        batch.validate()?;

        let mut active = self.active.lock().await;
        let model_preference = self.experiments.variant(MODEL_PREFERENCE)?;
        let submission = self.submitter.submit(batch, Some(model_preference)).await?;

        if let Some(previous) = active.take() {
            previous.cancel(CancelReason::Superseded).await;
        }

        match submission {
            Submission::Completed(result) => {
                let job = job_from_sync(result, batch.citations.len());
                let view = ValidationView::from_job(&job, false);
                self.poller.tracker().adopt(job).await;
                Ok(SubmitOutcome::Completed(view))
            }
            Submission::Queued {
                job_id,
                experiment_variant,
            } => {
                let mut job = Job::new(job_id.clone(), batch.citations.len());
                job.experiment_variant = experiment_variant;
                *active = Some(self.poller.start(job).await);
                Ok(SubmitOutcome::Queued {
                    job_id,
                    experiment_variant,
                })
            }
        }
    }

    /// Resume polling the job recorded in `current_job_id`.
    ///
    /// Returns the job id being polled, or `None` if nothing is pending. A job
    /// the backend no longer knows ends with [`Error::JobNotFound`] from
    /// [`wait`](Self::wait) and its id is cleared.
    pub async fn resume(&self) -> Result<Option<String>> {
        let mut active = self.active.lock().await;
        if let Some(handle) = active.as_ref() {
            if !handle.is_finished() {
                return Ok(Some(handle.job_id().to_string()));
            }
        }

        let Some(job_id) = self.store.get(KEY_CURRENT_JOB_ID)? else {
            debug!("No job to resume");
            return Ok(None);
        };

        info!(job_id = %job_id, "Resuming job");
        if let Some(finished) = active.take() {
            finished.wait().await;
        }
        *active = Some(self.poller.start(Job::new(job_id.clone(), 0)).await);
        Ok(Some(job_id))
    }

    /// Wait for the active job to finish and return its results.
    pub async fn wait(&self) -> Result<ValidationView> {
        let (job_id, mut state) = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(handle) => (handle.job_id().to_string(), handle.state()),
                None => {
                    return Err(Error::InvalidInput(
                        "no validation job in progress".to_string(),
                    ))
                }
            }
        };

        // A closed channel means the driver is gone; its outcome is on the handle.
        let _ = state.wait_for(|s| s.is_terminal()).await;

        let handle = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(handle) if handle.job_id() == job_id => active.take(),
                _ => None,
            }
        };
        let Some(handle) = handle else {
            return Err(Error::Cancelled(format!(
                "job {} was {}",
                job_id,
                CancelReason::Superseded
            )));
        };

        match handle.wait().await {
            PollOutcome::Completed(job) => Ok(self.view_of(&job).await),
            PollOutcome::Failed { error, .. } => Err(error),
            PollOutcome::Cancelled { job_id, reason } => {
                Err(Error::Cancelled(format!("job {} was {}", job_id, reason)))
            }
        }
    }

    /// Abandon the current job.
    ///
    /// Stops any active poll and forgets `current_job_id`, so the job will
    /// not be resumed.
    pub async fn cancel(&self) -> Result<Option<String>> {
        let mut active = self.active.lock().await;
        let job_id = match active.take() {
            Some(handle) => {
                let outcome = handle.cancel(CancelReason::UserCancelled).await;
                Some(outcome.job_id().to_string())
            }
            None => self.store.get(KEY_CURRENT_JOB_ID)?,
        };

        if let Some(id) = &job_id {
            self.store.clear_if(KEY_CURRENT_JOB_ID, id)?;
            self.poller.tracker().release(id).await;
            info!(job_id = %id, "Job abandoned");
        }
        Ok(job_id)
    }

    /// Stop polling but keep `current_job_id` for a later [`resume`](Self::resume).
    pub async fn detach(&self) {
        if let Some(handle) = self.active.lock().await.take() {
            handle.cancel(CancelReason::Detached).await;
        }
    }

    /// Current view of the tracked job, if any.
    pub async fn view(&self) -> Option<ValidationView> {
        let job = self.poller.tracker().snapshot().await?;
        Some(self.view_of(&job).await)
    }

    /// Record the reveal action for the tracked job and return its view.
    pub async fn reveal(&self) -> Option<ValidationView> {
        let job = self.poller.tracker().snapshot().await?;
        *self.revealed.lock().await = Some(job.id.clone());
        debug!(job_id = %job.id, "Results revealed");
        Some(ValidationView::from_job(&job, true))
    }

    /// Report a finished checkout for the pending partial job.
    pub fn complete_upgrade(&self, user_token: &str) -> Result<Option<UpgradeCompletion>> {
        self.upgrades.complete(user_token)
    }

    async fn view_of(&self, job: &Job) -> ValidationView {
        let revealed = self.revealed.lock().await.as_deref() == Some(job.id.as_str());
        ValidationView::from_job(job, revealed)
    }
}
