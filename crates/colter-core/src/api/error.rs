use thiserror::Error;

use crate::utils::truncate_string;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure to collect metrics for one entity. Recoverable: the entity is
/// skipped and the cycle continues.
#[derive(Error, Debug)]
pub enum SourceFetchError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be invalid or expired")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceFetchError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = truncate_string(body, MAX_ERROR_BODY_LENGTH);
        match status.as_u16() {
            401 => SourceFetchError::Unauthorized,
            403 => SourceFetchError::AccessDenied(truncated),
            404 => SourceFetchError::NotFound(truncated),
            429 => SourceFetchError::RateLimited,
            500..=599 => SourceFetchError::ServerError(truncated),
            _ => SourceFetchError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}
