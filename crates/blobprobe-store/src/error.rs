//! Storage error types.

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The caller's cancellation signal fired while the operation was pending.
    #[error("Operation cancelled")]
    Cancelled,

    /// Key cannot be mapped to a blob name.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Container name rejected by the naming rules.
    #[error("Invalid container name '{name}': {reason}")]
    InvalidContainerName {
        /// Offending name.
        name: String,
        /// Which rule it breaks.
        reason: &'static str,
    },

    /// Connection string could not be parsed or lacks credentials.
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Conditional write lost against a concurrent writer.
    #[error("ETag precondition failed for key '{key}'")]
    PreconditionFailed {
        /// Key whose ETag no longer matches.
        key: String,
    },

    /// Backend answered with a non-success status.
    #[error("{operation} '{target}' failed: HTTP {status} - {message}")]
    Http {
        /// Operation name (read, write, delete, create_container).
        operation: &'static str,
        /// Blob or container the request addressed.
        target: String,
        /// HTTP status code.
        status: u16,
        /// Error code or body returned by the service.
        message: String,
    },

    /// Stored document is not a JSON object.
    #[error("Stored value for key '{key}' is not a JSON object")]
    NotAnObject {
        /// Key holding the malformed document.
        key: String,
    },

    /// Request signing failed.
    #[error("Request signing failed: {0}")]
    Signing(String),

    /// Failure injected by a test backend.
    #[error("Injected failure: {0}")]
    Injected(String),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this error is the cancellation notification rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_display() {
        assert_eq!(StorageError::Cancelled.to_string(), "Operation cancelled");
        assert!(StorageError::Cancelled.is_cancelled());
    }

    #[test]
    fn http_display() {
        let e = StorageError::Http {
            operation: "read",
            target: "testbotstorage/MyKey".into(),
            status: 503,
            message: "ServerBusy".into(),
        };
        assert_eq!(
            e.to_string(),
            "read 'testbotstorage/MyKey' failed: HTTP 503 - ServerBusy"
        );
        assert!(!e.is_cancelled());
    }

    #[test]
    fn precondition_display() {
        let e = StorageError::PreconditionFailed { key: "k".into() };
        assert_eq!(e.to_string(), "ETag precondition failed for key 'k'");
    }

    #[test]
    fn invalid_container_display() {
        let e = StorageError::InvalidContainerName {
            name: "A".into(),
            reason: "must be 3-63 characters",
        };
        assert_eq!(
            e.to_string(),
            "Invalid container name 'A': must be 3-63 characters"
        );
    }

    #[test]
    fn json_error_from() {
        let json_err: Result<serde_json::Value, _> = serde_json::from_str("bad");
        let e: StorageError = json_err.unwrap_err().into();
        assert!(matches!(e, StorageError::Json(_)));
    }
}
