//! Centralized default constants for the citecheck client.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// BACKEND
// =============================================================================

/// Default validation backend base URL.
pub const API_URL: &str = "http://127.0.0.1:8000";

/// Default citation style identifier.
pub const STYLE: &str = "apa7";

/// Per-request HTTP timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 20;

// =============================================================================
// POLLING
// =============================================================================

/// Base interval between status requests in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 2_000;

/// Upper bound for the backed-off poll interval in milliseconds.
pub const POLL_MAX_INTERVAL_MS: u64 = 10_000;

/// Multiplier applied to the poll interval after a retryable failure.
pub const POLL_BACKOFF_FACTOR: u32 = 2;

/// Total polling budget per job in seconds.
///
/// Exceeding it ends the job with a `Timeout` failure rather than leaving the
/// caller waiting indefinitely.
pub const POLL_BUDGET_SECS: u64 = 90;

/// Poller event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 64;

// =============================================================================
// STORAGE KEYS
// =============================================================================

/// Job id of the in-flight async validation.
pub const KEY_CURRENT_JOB_ID: &str = "current_job_id";

/// Job id of a partial result awaiting an upgrade purchase.
pub const KEY_PENDING_UPGRADE_JOB_ID: &str = "pending_upgrade_job_id";

/// Persisted model-provider preference experiment arm.
pub const KEY_MODEL_PREFERENCE: &str = "model_preference";

/// Persisted pricing UI experiment arm.
pub const KEY_PRICING_VARIANT: &str = "pricing_variant";

/// Default state file for the file-backed job store.
pub const STATE_FILE: &str = ".citecheck/state.json";
