use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or unusable configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Key/value storage failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Assessment document could not be loaded.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Attempt session contract violation.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// What failed.
        message: String,
    },
}

/// Key/value storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend disabled or not reachable.
    #[error("Storage unavailable: {message}")]
    Unavailable {
        /// Why the backend is unavailable.
        message: String,
    },

    /// Filesystem operation failed.
    #[error("I/O failed for key {key}: {source}")]
    Io {
        /// Key being read or written.
        key: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Assessment document errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Document is not valid JSON of the expected shape.
    #[error("Failed to parse assessment document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Document file could not be read.
    #[error("Failed to read assessment document {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Attempt session contract errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Position outside `-1..total`.
    #[error("Item index {index} out of range (total items: {total})")]
    IndexOutOfRange {
        /// Requested position.
        index: i64,
        /// Number of items.
        total: usize,
    },

    /// Identifier not in the realization.
    #[error("Unknown item identifier: {identifier}")]
    UnknownItem {
        /// Requested identifier.
        identifier: String,
    },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for document loading
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
