//! Backend error mapping.

use serde::Deserialize;

use citecheck_core::Error;

/// Error body returned by the backend (`{"detail": ...}` or `{"error": ...}`).
#[derive(Debug, Default, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BackendErrorBody {
    /// Best human-readable message from the body.
    pub fn message(&self) -> String {
        match (&self.detail, &self.error) {
            (Some(serde_json::Value::String(s)), _) => s.clone(),
            (Some(other), _) => other.to_string(),
            (None, Some(e)) => e.clone(),
            (None, None) => "Unknown error".to_string(),
        }
    }
}

/// Backend error categories derived from HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    /// Request rejected as invalid (400, 422).
    InvalidInput,
    /// No credits left (402).
    InsufficientCredits,
    /// Free-tier daily limit reached (429).
    DailyLimit,
    /// Job id unknown (404).
    NotFound,
    /// Upstream timeout or server error (408, 5xx).
    ServerError,
    /// Anything else.
    Unknown,
}

impl BackendErrorCode {
    /// Determine error code from HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidInput,
            402 => Self::InsufficientCredits,
            429 => Self::DailyLimit,
            404 => Self::NotFound,
            408 | 500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError)
    }
}

/// Convert a backend error response to a citecheck Error.
///
/// `job_id` is set when the request targeted a specific job, so a 404 can be
/// reported as [`Error::JobNotFound`].
pub fn to_citecheck_error(
    code: BackendErrorCode,
    status: u16,
    message: &str,
    job_id: Option<&str>,
) -> Error {
    match code {
        BackendErrorCode::InvalidInput => Error::InvalidInput(message.to_string()),
        BackendErrorCode::InsufficientCredits => Error::InsufficientCredits(message.to_string()),
        BackendErrorCode::DailyLimit => Error::DailyLimit(message.to_string()),
        BackendErrorCode::NotFound => match job_id {
            Some(id) => Error::JobNotFound(id.to_string()),
            None => Error::Network(format!("Backend returned 404: {}", message)),
        },
        BackendErrorCode::ServerError => {
            Error::Network(format!("Backend returned {}: {}", status, message))
        }
        BackendErrorCode::Unknown => {
            Error::Internal(format!("Backend returned {}: {}", status, message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_402() {
        assert_eq!(
            BackendErrorCode::from_status(402),
            BackendErrorCode::InsufficientCredits
        );
    }

    #[test]
    fn test_error_code_from_429() {
        assert_eq!(
            BackendErrorCode::from_status(429),
            BackendErrorCode::DailyLimit
        );
    }

    #[test]
    fn test_error_code_from_422() {
        assert_eq!(
            BackendErrorCode::from_status(422),
            BackendErrorCode::InvalidInput
        );
    }

    #[test]
    fn test_error_code_from_503() {
        assert_eq!(
            BackendErrorCode::from_status(503),
            BackendErrorCode::ServerError
        );
    }

    #[test]
    fn test_error_code_from_unknown() {
        assert_eq!(
            BackendErrorCode::from_status(418),
            BackendErrorCode::Unknown
        );
    }

    #[test]
    fn test_retryable_server_error() {
        assert!(BackendErrorCode::ServerError.is_retryable());
        assert!(!BackendErrorCode::DailyLimit.is_retryable());
        assert!(!BackendErrorCode::InsufficientCredits.is_retryable());
    }

    #[test]
    fn test_not_found_with_job_id() {
        let err = to_citecheck_error(BackendErrorCode::NotFound, 404, "gone", Some("job-1"));
        assert!(matches!(err, Error::JobNotFound(id) if id == "job-1"));
    }

    #[test]
    fn test_server_error_maps_to_retryable_network() {
        let err = to_citecheck_error(BackendErrorCode::ServerError, 502, "bad gateway", None);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_body_message_variants() {
        let body: BackendErrorBody =
            serde_json::from_str(r#"{"detail": "Insufficient credits"}"#).unwrap();
        assert_eq!(body.message(), "Insufficient credits");

        let body: BackendErrorBody = serde_json::from_str(r#"{"error": "limit"}"#).unwrap();
        assert_eq!(body.message(), "limit");

        let body: BackendErrorBody =
            serde_json::from_str(r#"{"detail": [{"loc": ["citations"]}]}"#).unwrap();
        assert!(body.message().contains("citations"));

        assert_eq!(BackendErrorBody::default().message(), "Unknown error");
    }
}
