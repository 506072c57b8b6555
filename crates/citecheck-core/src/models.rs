//! Core data models for citecheck.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a validation job as reported by the backend.
///
/// Status only moves forward: `pending → processing → {partial | completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    /// Finished with only part of the batch validated; awaiting an upgrade.
    Partial,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Partial | Self::Completed | Self::Failed => 2,
        }
    }

    /// Whether polling stops at this status.
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether a response with this status carries a result payload.
    pub fn carries_results(self) -> bool {
        matches!(self, Self::Partial | Self::Completed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    ///
    /// Re-reporting the same status is allowed; leaving a terminal status is not.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Partial => write!(f, "partial"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "partial" => Ok(Self::Partial),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::MalformedResponse(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Client-side view of a tracked validation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque backend identifier.
    pub id: String,
    pub status: JobStatus,
    /// Number of citations in the submitted batch.
    pub submitted_count: usize,
    /// Number of citations the backend has returned results for.
    pub processed_count: usize,
    /// Reference results in submission order.
    pub results: Vec<ReferenceResult>,
    /// Flat inline-citation matches, when the backend does not pre-nest them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_results: Option<Vec<InlineCitationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphans: Option<Vec<InlineCitationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<UserStatus>,
    /// Backend decision to withhold results until a reveal action.
    #[serde(default)]
    pub results_gated: bool,
    /// Experiment arm reported by the backend at submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_variant: Option<u32>,
    /// Failure detail when status is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a freshly submitted job in `pending` status.
    pub fn new(id: impl Into<String>, submitted_count: usize) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            submitted_count,
            processed_count: 0,
            results: Vec::new(),
            inline_results: None,
            orphans: None,
            user_status: None,
            results_gated: false,
            experiment_variant: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the job ended with only part of the batch validated.
    pub fn is_partial(&self) -> bool {
        self.status == JobStatus::Partial
    }

    /// Apply a status response.
    ///
    /// A status that would move the job backwards is ignored. Results are
    /// replaced only when the response status carries them. Returns `true` if
    /// the job status changed.
    pub fn apply(&mut self, response: JobStatusResponse) -> bool {
        let previous = self.status;
        if !self.status.can_advance_to(response.status) {
            return false;
        }
        self.status = response.status;

        if let Some(submitted) = response.submitted_count {
            self.submitted_count = submitted;
        }
        if response.status == JobStatus::Failed {
            self.error = response.error;
        }

        if response.status.carries_results() {
            if let Some(payload) = response.results {
                self.results = payload.results.unwrap_or_default();
                self.inline_results = payload.inline_results;
                self.orphans = payload.orphans;
                if payload.user_status.is_some() {
                    self.user_status = payload.user_status;
                }
                self.results_gated = payload.results_gated;
            }
            self.processed_count = response
                .processed_count
                .unwrap_or(self.results.len());
        }

        previous != self.status
    }
}

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Outcome of matching an inline citation against the reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Matched,
    Mismatch,
    Ambiguous,
    Orphan,
}

/// An in-text citation marker and its match against the reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineCitationResult {
    pub id: String,
    /// Citation text as it appears in the document body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_text: Option<String>,
    /// Index into the reference list, or `None` when nothing matched.
    #[serde(default)]
    pub matched_ref_index: Option<i64>,
    pub match_status: MatchStatus,
}

/// A single validation problem found in a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationError {
    /// Citation component the problem applies to (author, title, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

/// Validation result for one formatted reference entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceResult {
    pub citation_number: u32,
    pub original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<CitationError>>,
    /// Inline citations matched to this reference, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_citations: Option<Vec<InlineCitationResult>>,
}

impl ReferenceResult {
    /// A reference with no errors, absent or empty.
    pub fn is_perfect(&self) -> bool {
        self.errors.as_ref().map_or(true, |e| e.is_empty())
    }

    /// Number of inline citations already nested under this reference.
    pub fn nested_inline_count(&self) -> usize {
        self.inline_citations.as_ref().map_or(0, Vec::len)
    }
}

// =============================================================================
// USER STATUS
// =============================================================================

/// Account tier as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Free,
    Credits,
    Pass,
}

/// Backend-owned usage state returned alongside results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
    #[serde(rename = "type", default)]
    pub tier: UserTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u32>,
}

// =============================================================================
// EXPERIMENTS
// =============================================================================

/// A persisted experiment arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub key: String,
    pub value: String,
    pub assigned_at: DateTime<Utc>,
}

/// A two-or-more-arm experiment with a fixed set of valid values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Experiment {
    /// Storage key the assignment lives under.
    pub key: &'static str,
    /// Valid arms, drawn uniformly.
    pub variants: &'static [&'static str],
}

impl Experiment {
    /// Whether `value` is one of this experiment's arms.
    pub fn is_valid(&self, value: &str) -> bool {
        self.variants.contains(&value)
    }
}

/// Model-provider preference sent with each submission.
pub const MODEL_PREFERENCE: Experiment = Experiment {
    key: crate::defaults::KEY_MODEL_PREFERENCE,
    variants: &["model_a", "model_b"],
};

/// Pricing UI presented on the upgrade path.
pub const PRICING_VARIANT: Experiment = Experiment {
    key: crate::defaults::KEY_PRICING_VARIANT,
    variants: &["1.credits", "2.passes"],
};

/// All experiments known to this client.
pub const EXPERIMENTS: &[Experiment] = &[MODEL_PREFERENCE, PRICING_VARIANT];

/// Look up an experiment by its storage key.
pub fn experiment_by_key(key: &str) -> Option<Experiment> {
    EXPERIMENTS.iter().copied().find(|e| e.key == key)
}

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

/// An ordered batch of citations to validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationBatch {
    pub citations: Vec<String>,
    pub style: String,
    /// Reference to an uploaded document, for inline-citation matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl CitationBatch {
    pub fn new(citations: Vec<String>, style: impl Into<String>) -> Self {
        Self {
            citations,
            style: style.into(),
            document_id: None,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Reject batches with no non-blank citation.
    pub fn validate(&self) -> Result<()> {
        if self.citations.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::EmptyBatch);
        }
        if self.style.trim().is_empty() {
            return Err(Error::InvalidInput("style cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Body for `POST /api/validate` and `POST /api/validate/async`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub citations: Vec<String>,
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preference: Option<String>,
}

impl ValidationRequest {
    pub fn from_batch(batch: &CitationBatch, model_preference: Option<String>) -> Self {
        Self {
            citations: batch.citations.clone(),
            style: batch.style.clone(),
            document_id: batch.document_id.clone(),
            model_preference,
        }
    }
}

/// Response of the synchronous validation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncValidation {
    pub results: Vec<ReferenceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_results: Option<Vec<InlineCitationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphans: Option<Vec<InlineCitationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<UserStatus>,
    #[serde(default)]
    pub results_gated: bool,
}

/// Response of the async submission endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncSubmission {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub experiment_variant: Option<u32>,
}

/// Result payload nested in a job status response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    #[serde(default)]
    pub results: Option<Vec<ReferenceResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_results: Option<Vec<InlineCitationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphans: Option<Vec<InlineCitationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<UserStatus>,
    #[serde(default)]
    pub results_gated: bool,
}

/// Response of `GET /api/jobs/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub results: Option<JobResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    /// A bare status response with no payload.
    pub fn status_only(status: JobStatus) -> Self {
        Self {
            status,
            results: None,
            submitted_count: None,
            processed_count: None,
            error: None,
        }
    }

    /// Check that a result-bearing status actually carries its results.
    pub fn validate(&self) -> Result<()> {
        if !self.status.carries_results() {
            return Ok(());
        }
        match &self.results {
            None => Err(Error::MalformedResponse(format!(
                "status {} without results payload",
                self.status
            ))),
            Some(payload) if payload.results.is_none() => Err(Error::MalformedResponse(
                format!("status {} payload missing results list", self.status),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Body for `POST /api/upgrade-event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeEvent {
    pub job_id: String,
    pub event: String,
}

impl UpgradeEvent {
    pub fn success(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            event: "success".to_string(),
        }
    }
}
