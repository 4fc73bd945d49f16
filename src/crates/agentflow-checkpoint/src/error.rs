//! Error types for the checkpoint crate

use thiserror::Error;

/// Result alias for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors produced by checkpoint storage, durability, and recovery
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The requested checkpoint (or thread) does not exist
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// The request itself was malformed (missing id, bad config)
    #[error("invalid checkpoint request: {0}")]
    Invalid(String),

    /// State could not be serialized or deserialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The storage backend failed
    #[error("storage backend error: {0}")]
    Storage(String),

    /// A durable task exhausted its retry budget
    #[error("task '{task}' failed after {attempts} attempt(s): {message}")]
    TaskFailed {
        task: String,
        attempts: u32,
        message: String,
    },

    /// Recovery could not restore the thread
    #[error("recovery failed for thread '{thread}': {message}")]
    RecoveryFailed { thread: String, message: String },

    /// Retry configuration was rejected (e.g. negative budget)
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),

    /// The operation was cancelled before completing
    #[error("operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(err: bincode::Error) -> Self {
        CheckpointError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CheckpointError::NotFound("thread-1".to_string());
        assert_eq!(err.to_string(), "checkpoint not found: thread-1");

        let err = CheckpointError::TaskFailed {
            task: "enrich".to_string(),
            attempts: 3,
            message: "io".to_string(),
        };
        assert!(err.to_string().contains("enrich"));
        assert!(err.to_string().contains("3 attempt"));
    }

    #[test]
    fn test_serde_error_converts() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: CheckpointError = bad.unwrap_err().into();
        assert!(matches!(err, CheckpointError::Serialization(_)));
    }
}
