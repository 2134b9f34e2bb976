//! Error types shared across the PulseOx crates.
//!
//! Request-path errors map onto a small taxonomy that the API layer
//! translates to HTTP statuses. Components return these directly; no
//! retry is performed for caller-fixable kinds.

use thiserror::Error;

/// Result type for PulseOx operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced device, schedule, user or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credential mismatch (device secret or bearer token).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Identity is valid but lacks permission, or the action would
    /// violate an invariant (e.g. removing the last member of a device).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed or semantically invalid input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The current state disallows the action.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external collaborator (broker, identity service, LLM) failed
    /// or timed out.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Document store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Short machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Conflict(_) => "CONFLICT",
            Error::Upstream(_) => "UPSTREAM_FAILURE",
            Error::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// A device lookup miss, phrased consistently across endpoints.
    pub fn device_not_found(device_id: &str) -> Self {
        Error::NotFound(format!("device not found: {device_id}"))
    }

    /// A schedule lookup miss.
    pub fn schedule_not_found(schedule_id: &str) -> Self {
        Error::NotFound(format!("schedule not found: {schedule_id}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(Error::Upstream("x".into()).code(), "UPSTREAM_FAILURE");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::device_not_found("esp");
        assert!(err.to_string().contains("esp"));
    }
}
