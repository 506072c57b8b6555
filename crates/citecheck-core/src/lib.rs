//! # citecheck-core
//!
//! Core types, traits, and pure logic for the citecheck validation client.
//!
//! This crate provides:
//! - The job, reference, and inline-citation data model
//! - The error taxonomy shared by every citecheck crate
//! - [`JobStore`] and [`ValidationTransport`] traits
//! - Result reconciliation ([`reconcile`]) and paywall gating ([`gating`])
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Terminal failure surfaced to the user |
//! | WARN  | Retried transient failure, discarded stale response |
//! | INFO  | Submission, job adoption, terminal transitions |
//! | DEBUG | Poll ticks, backoff decisions, storage writes |

pub mod defaults;
pub mod error;
pub mod gating;
pub mod models;
pub mod reconcile;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use gating::{evaluate, visibility, GatingInput, GatingSummary, VisibilityMode};
pub use models::*;
pub use reconcile::{reconcile, InlineInput, InlineStats, Reconciliation};
pub use traits::*;
