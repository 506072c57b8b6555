//! Partial-result upgrade tracking.
//!
//! When a job ends `partial`, its id is remembered as the pending upgrade.
//! Completing checkout reports the upgrade to the backend and forgets the id.
//! The report is best effort: the local record is cleared whether or not the
//! backend accepts it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use citecheck_core::defaults::KEY_PENDING_UPGRADE_JOB_ID;
use citecheck_core::{JobStore, Result, UpgradeEvent, ValidationTransport};

/// A completed upgrade whose report may still be in flight.
#[derive(Debug)]
pub struct UpgradeCompletion {
    pub job_id: String,
    /// Background report task. Safe to drop.
    pub report: JoinHandle<()>,
}

/// Owns `pending_upgrade_job_id`.
#[derive(Clone)]
pub struct UpgradeTracker {
    transport: Arc<dyn ValidationTransport>,
    store: Arc<dyn JobStore>,
}

impl UpgradeTracker {
    pub fn new(transport: Arc<dyn ValidationTransport>, store: Arc<dyn JobStore>) -> Self {
        Self { transport, store }
    }

    /// Remember `job_id` as awaiting an upgrade.
    pub fn mark_pending(&self, job_id: &str) -> Result<()> {
        self.store.set(KEY_PENDING_UPGRADE_JOB_ID, job_id)?;
        info!(job_id, "Partial results awaiting upgrade");
        Ok(())
    }

    pub fn pending(&self) -> Result<Option<String>> {
        self.store.get(KEY_PENDING_UPGRADE_JOB_ID)
    }

    /// Finish the upgrade flow for the pending job, if any.
    ///
    /// Must be called inside a Tokio runtime; the report runs on a spawned
    /// task and never delays the local clear.
    pub fn complete(&self, user_token: &str) -> Result<Option<UpgradeCompletion>> {
        let Some(job_id) = self.pending()? else {
            return Ok(None);
        };
        self.store.clear(KEY_PENDING_UPGRADE_JOB_ID)?;

        let transport = self.transport.clone();
        let token = user_token.to_string();
        let event = UpgradeEvent::success(job_id.clone());
        let report = tokio::spawn(async move {
            match transport.report_upgrade(&token, &event).await {
                Ok(()) => info!(job_id = %event.job_id, "Upgrade reported"),
                Err(e) => warn!(
                    job_id = %event.job_id,
                    error = %e,
                    "Failed to report upgrade"
                ),
            }
        });

        Ok(Some(UpgradeCompletion { job_id, report }))
    }
}
