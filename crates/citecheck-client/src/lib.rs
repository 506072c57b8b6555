//! # citecheck-client
//!
//! HTTP transport for the citecheck validation backend.
//!
//! This crate provides:
//! - [`HttpTransport`], a reqwest implementation of [`ValidationTransport`]
//! - Client configuration loaded from `CITECHECK_*` environment variables
//! - Mapping of backend HTTP errors onto the citecheck error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use citecheck_client::{ClientConfig, HttpTransport};
//! use citecheck_core::ValidationTransport;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = HttpTransport::new(ClientConfig::from_env()).unwrap();
//!     let status = transport.job_status("job-123").await.unwrap();
//!     println!("{}", status.status);
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;

// Re-export core types
pub use citecheck_core::*;

pub use config::{ClientConfig, ConfigError, SubmitMode};
pub use error::{BackendErrorBody, BackendErrorCode};
pub use http::HttpTransport;
