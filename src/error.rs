//! Error types for the tree store.

use thiserror::Error;

/// Main error type for tree store operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("tree store is already initialised")]
    AlreadyInitialized,

    #[error("tree store is not initialised")]
    NotInitialized,

    #[error("sha1 mismatch for {path}")]
    Integrity { path: String },

    #[error("chunk not found in store: {key}")]
    ChunkMissing { key: String },

    #[error("operation refused: {reason}")]
    Refused { reason: String },

    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("unknown metadata key: {key}")]
    InvalidMetadata { key: String },

    #[error("http fetch of {url} failed: {reason}")]
    Http { url: String, reason: String },
}

impl Error {
    /// True when the error denotes an absent blob store key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type alias for tree store operations
pub type Result<T> = std::result::Result<T, Error>;
