//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror`, while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level application error enum
//! - Module-specific errors (e.g., [`MetadataError`], [`SourceError`]) stay
//!   inside their subsystem; the CLI reports them through `anyhow`
//! - Fulfillment step errors never reach callers as `Err`; the engine stores
//!   them on the request as a failure reason. Only persistence problems and
//!   unknown ids surface through [`Error`].
//!
//! [`MetadataError`]: crate::metadata::MetadataError
//! [`SourceError`]: crate::sources::SourceError

use crate::model::RequestStatus;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No request with this id
    #[error("Request {0} not found")]
    RequestNotFound(i64),

    /// Status change outside the allowed-transition table, or a stale write
    #[error("Request {id}: transition {from} -> {to} rejected")]
    InvalidTransition {
        id: i64,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Bad caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a corrupt record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_not_found_display() {
        let err = Error::RequestNotFound(42);
        assert_eq!(err.to_string(), "Request 42 not found");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            id: 7,
            from: RequestStatus::Completed,
            to: RequestStatus::Searching,
        };
        let msg = err.to_string();
        assert!(msg.contains("completed -> searching"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::invalid_input("title is required").context("while creating request");
        let msg = err.to_string();
        assert!(msg.contains("while creating request"));
        assert!(msg.contains("title is required"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(Error::corrupt("bad status"));
        let with_ctx = result.with_context("loading settings");
        assert!(with_ctx.unwrap_err().to_string().contains("loading settings"));
    }
}
