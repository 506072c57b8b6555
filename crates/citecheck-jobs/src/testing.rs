//! Scripted backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use citecheck_core::{
    AsyncSubmission, Error, JobResults, JobStatus, JobStatusResponse, ReferenceResult, Result,
    SyncValidation, UpgradeEvent, ValidationRequest, ValidationTransport,
};

/// One scripted reply to `job_status`.
pub enum Reply {
    Status(JobStatusResponse),
    Error(fn() -> Error),
    /// Never resolves.
    Hang,
    /// Resolves with the response once the notify fires.
    Gated(Arc<Notify>, JobStatusResponse),
    Panic,
}

pub fn reference(n: u32, error_count: usize) -> ReferenceResult {
    let errors = (0..error_count)
        .map(|i| citecheck_core::CitationError {
            component: Some("author".to_string()),
            problem: format!("problem {}", i),
            correction: None,
        })
        .collect::<Vec<_>>();
    ReferenceResult {
        citation_number: n,
        original: format!("Reference {}", n),
        source_type: Some("journal".to_string()),
        errors: if errors.is_empty() { None } else { Some(errors) },
        inline_citations: None,
    }
}

pub fn processing() -> JobStatusResponse {
    JobStatusResponse::status_only(JobStatus::Processing)
}

pub fn completed(n: usize) -> JobStatusResponse {
    JobStatusResponse {
        status: JobStatus::Completed,
        results: Some(JobResults {
            results: Some((1..=n as u32).map(|i| reference(i, 0)).collect()),
            ..Default::default()
        }),
        submitted_count: Some(n),
        processed_count: Some(n),
        error: None,
    }
}

pub fn partial(processed: usize, submitted: usize) -> JobStatusResponse {
    JobStatusResponse {
        status: JobStatus::Partial,
        results: Some(JobResults {
            results: Some((1..=processed as u32).map(|i| reference(i, 0)).collect()),
            results_gated: true,
            ..Default::default()
        }),
        submitted_count: Some(submitted),
        processed_count: Some(processed),
        error: None,
    }
}

pub fn failed(message: &str) -> JobStatusResponse {
    JobStatusResponse {
        error: Some(message.to_string()),
        ..JobStatusResponse::status_only(JobStatus::Failed)
    }
}

/// Backend double driven by per-job reply queues.
///
/// A job with an exhausted queue reports `pending` forever.
#[derive(Default)]
pub struct ScriptedTransport {
    job_ids: Mutex<VecDeque<String>>,
    sync_results: usize,
    submit_error: Option<fn() -> Error>,
    accepted_before_error: usize,
    upgrade_error: Option<fn() -> Error>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    submitted: Mutex<Vec<ValidationRequest>>,
    status_calls: Mutex<Vec<String>>,
    upgrades: Mutex<Vec<(String, UpgradeEvent)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the id returned by the next async submission.
    pub fn with_job_id(self, id: &str) -> Self {
        self.job_ids.lock().unwrap().push_back(id.to_string());
        self
    }

    pub fn with_sync_results(mut self, n: usize) -> Self {
        self.sync_results = n;
        self
    }

    pub fn with_submit_error(mut self, error: fn() -> Error) -> Self {
        self.submit_error = Some(error);
        self
    }

    /// Accept the first `accepted` submissions, then fail.
    pub fn with_submit_error_after(mut self, accepted: usize, error: fn() -> Error) -> Self {
        self.submit_error = Some(error);
        self.accepted_before_error = accepted;
        self
    }

    fn submit_failure(&self, attempt: usize) -> Option<Error> {
        self.submit_error
            .filter(|_| attempt > self.accepted_before_error)
            .map(|error| error())
    }

    pub fn with_upgrade_error(mut self, error: fn() -> Error) -> Self {
        self.upgrade_error = Some(error);
        self
    }

    pub fn with_replies(self, job_id: &str, replies: Vec<Reply>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(job_id.to_string(), replies.into());
        self
    }

    pub fn submitted_requests(&self) -> Vec<ValidationRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == job_id)
            .count()
    }

    pub fn upgrade_reports(&self) -> Vec<(String, UpgradeEvent)> {
        self.upgrades.lock().unwrap().clone()
    }
}

#[async_trait]
impl ValidationTransport for ScriptedTransport {
    async fn validate(&self, request: &ValidationRequest) -> Result<SyncValidation> {
        let attempt = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            submitted.len()
        };
        if let Some(error) = self.submit_failure(attempt) {
            return Err(error);
        }
        Ok(SyncValidation {
            results: (1..=self.sync_results as u32)
                .map(|i| reference(i, 0))
                .collect(),
            inline_results: None,
            orphans: None,
            user_status: None,
            results_gated: false,
        })
    }

    async fn submit(&self, request: &ValidationRequest) -> Result<AsyncSubmission> {
        let attempt = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            submitted.len()
        };
        if let Some(error) = self.submit_failure(attempt) {
            return Err(error);
        }
        let job_id = self
            .job_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("job-{}", attempt));
        Ok(AsyncSubmission {
            job_id,
            status: JobStatus::Pending,
            experiment_variant: None,
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse> {
        let reply = {
            self.status_calls.lock().unwrap().push(job_id.to_string());
            self.replies
                .lock()
                .unwrap()
                .get_mut(job_id)
                .and_then(VecDeque::pop_front)
        };

        match reply {
            None => Ok(JobStatusResponse::status_only(JobStatus::Pending)),
            Some(Reply::Status(response)) => Ok(response),
            Some(Reply::Error(error)) => Err(error()),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Gated(notify, response)) => {
                notify.notified().await;
                Ok(response)
            }
            Some(Reply::Panic) => panic!("scripted transport panic for {}", job_id),
        }
    }

    async fn report_upgrade(&self, user_token: &str, event: &UpgradeEvent) -> Result<()> {
        self.upgrades
            .lock()
            .unwrap()
            .push((user_token.to_string(), event.clone()));
        match self.upgrade_error {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }
}
