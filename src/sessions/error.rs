//! Error types for the session subsystem
//!
//! Only storage problems are errors here. Inconsistent lifecycle events (an end
//! without a start, a second start) are reported as ignored outcomes instead.

use thiserror::Error;

/// Errors that can occur while loading or saving session state
#[derive(Debug, Error)]
pub enum SessionError {
    /// The SQLite backend rejected a query
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Generic storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<String> for SessionError {
    fn from(message: String) -> Self {
        Self::Storage(message)
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
