//! Error types for the stub dispatch core.

use thiserror::Error;

/// Errors returned by the store and the dispatch service.
///
/// The core never retries; every failure is handed back untouched so the
/// transport layer can translate it into a protocol-specific status.
#[derive(Debug, Error)]
pub enum MockError {
    /// Malformed stub or rule definition, or invalid paging arguments.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No active stub for the requested URL or id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Store unavailable or a constraint was violated.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A header map could not be encoded or decoded.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller cancelled while a rule delay was pending.
    #[error("request cancelled during rule delay")]
    Cancelled,

    /// The dispatch service has been shut down.
    #[error("dispatch service is shutting down")]
    ShuttingDown,
}

impl MockError {
    /// Suggested HTTP status for transports that surface this error.
    pub fn http_status(&self) -> u16 {
        match self {
            MockError::Validation(_) => 400,
            MockError::NotFound(_) => 404,
            MockError::Persistence(_) | MockError::Serialization(_) => 500,
            MockError::Cancelled => 499,
            MockError::ShuttingDown => 503,
        }
    }
}

pub type MockResult<T> = Result<T, MockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(MockError::Validation("bad".into()).http_status(), 400);
        assert_eq!(MockError::NotFound("url /x".into()).http_status(), 404);
        assert_eq!(MockError::Persistence("down".into()).http_status(), 500);
        assert_eq!(MockError::Cancelled.http_status(), 499);
        assert_eq!(MockError::ShuttingDown.http_status(), 503);

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(MockError::from(json_err).http_status(), 500);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = MockError::NotFound("url /missing".into());
        assert_eq!(err.to_string(), "not found: url /missing");
    }
}
