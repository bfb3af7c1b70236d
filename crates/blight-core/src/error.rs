//! Error types for blight-core storage operations

use thiserror::Error;

/// Result type alias using blight-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in local store operations
#[derive(Error, Debug)]
pub enum Error {
    /// The local store failed to open and caching is disabled.
    ///
    /// Callers are expected to degrade gracefully: capture keeps working
    /// in memory for the session, only persistence is lost.
    #[error("Local store is unavailable")]
    StoreUnavailable,

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
