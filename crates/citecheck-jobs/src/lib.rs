//! # citecheck-jobs
//!
//! Validation job orchestration for citecheck.
//!
//! This crate provides:
//! - Batch submission in synchronous or async mode
//! - Job polling with backoff, a total time budget, and stale-response discard
//! - Durable job id and experiment storage (file or in-memory)
//! - Sticky A/B experiment assignment
//! - Partial-result upgrade tracking
//! - Poller events via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use citecheck_client::HttpTransport;
//! use citecheck_jobs::{CitationBatch, FileJobStore, SubmitOutcome, ValidationSession};
//!
//! let transport = Arc::new(HttpTransport::from_env()?);
//! let store = Arc::new(FileJobStore::open(".citecheck/state.json")?);
//! let session = ValidationSession::builder(transport, store).build();
//!
//! let batch = CitationBatch::new(vec!["Smith, J. (2020). Title.".into()], "apa7");
//! if let SubmitOutcome::Queued { job_id, .. } = session.submit(&batch).await? {
//!     println!("Polling {}", job_id);
//!     let view = session.wait().await?;
//!     println!("{} perfect", view.summary.perfect);
//! }
//! ```

pub mod experiment;
pub mod poller;
pub mod session;
pub mod store;
pub mod submitter;
pub mod tracker;
pub mod upgrade;

#[cfg(test)]
mod testing;

// Re-export core types
pub use citecheck_core::*;

pub use experiment::ExperimentAssigner;
pub use poller::{
    CancelReason, JobPoller, PollConfig, PollHandle, PollMachine, PollOutcome, PollerEvent,
    PollerState,
};
pub use session::{SessionBuilder, SubmitOutcome, ValidationSession, ValidationView};
pub use store::{FileJobStore, MemoryJobStore};
pub use submitter::{JobSubmitter, Submission};
pub use tracker::{ApplyOutcome, JobTracker};
pub use upgrade::{UpgradeCompletion, UpgradeTracker};
