// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the feed mirror.
//!
//! Errors are categorized by the component that produced them and carry
//! enough context to be logged once at the poll loop boundary.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `RemoteUnavailable` | Yes | Transport failure or non-success HTTP status |
//! | `StoreUnavailable` | Yes | SQLite I/O failure |
//! | `StoreFailure` | Yes | Non-SQLite store failure (e.g. in-memory fault) |
//! | `MalformedPayload` | No | Corrupt payload or response shape mismatch |
//! | `RangeTooLarge` | No | Requested ID span exceeds what the feed serves |
//! | `NotFound` | No | No stored record with the requested id |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Nothing inside a cycle retries. [`MirrorError::is_retryable()`] only says
//! whether the *next scheduled cycle* can be expected to make progress;
//! the poll loop keeps running either way.

use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring the feed.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Payload bytes or response body could not be decoded.
    ///
    /// Retrying will not change bytes already received.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Remote feed unreachable or answered with a non-success status.
    #[error("Remote unavailable ({operation}): {message}")]
    RemoteUnavailable { operation: String, message: String },

    /// SQLite error while reading the watermark or appending a batch.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// Store failure that did not originate in SQLite.
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// Requested ID span is wider than the feed serves in one request.
    #[error("Range too large: span {span} exceeds limit {limit}")]
    RangeTooLarge { span: i64, limit: i64 },

    /// No stored record has this id.
    #[error("Record not found: {0}")]
    NotFound(i64),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` on an already-running engine).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Create a remote error for the given operation.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }

    /// Check if the next cycle can be expected to recover from this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteUnavailable { .. } => true,
            Self::StoreUnavailable(_) => true,
            Self::StoreFailure(_) => true,
            Self::MalformedPayload(_) => false, // Data corruption
            Self::RangeTooLarge { .. } => false,
            Self::NotFound(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::RemoteUnavailable { .. } => "remote_unavailable",
            Self::StoreUnavailable(_) | Self::StoreFailure(_) => "store_unavailable",
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_remote() {
        let err = MirrorError::remote("stat", "connection reset");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("stat"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_is_retryable_store() {
        let err = MirrorError::StoreUnavailable(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "store_unavailable");

        let err = MirrorError::StoreFailure("disk full".to_string());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn test_not_retryable_malformed() {
        let err = MirrorError::malformed("missing header, length: 2");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "malformed_payload");
        assert!(err.to_string().contains("missing header"));
    }

    #[test]
    fn test_not_retryable_range_too_large() {
        let err = MirrorError::RangeTooLarge { span: 1200, limit: 1000 };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("1200"));
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn test_not_found() {
        let err = MirrorError::NotFound(149_470_001);
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "Record not found: 149470001");
    }

    #[test]
    fn test_not_retryable_config() {
        let err = MirrorError::Config("block_size must be positive".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = MirrorError::InvalidState {
            expected: "Idle".to_string(),
            actual: "Stopped".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("Stopped"));
    }

    #[test]
    fn test_not_retryable_shutdown_and_internal() {
        assert!(!MirrorError::Shutdown.is_retryable());
        assert!(!MirrorError::Internal("unexpected".to_string()).is_retryable());
    }

    #[test]
    fn test_sqlx_error_converts() {
        let err: MirrorError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, MirrorError::StoreUnavailable(_)));
    }
}
