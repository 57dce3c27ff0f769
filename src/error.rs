//! Error types for ingestion and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad or missing credential (HTTP 401). Never retried.
    #[error("Unauthorized (401). Check SUPABASE_SERVICE_ROLE_KEY or SUPABASE_ANON_KEY.")]
    Auth,

    /// Transient server condition (HTTP 5xx) on the ingestion path
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Network failure, timeout, unexpected status or malformed response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response on a read path
    #[error("Fetch failed with status {status}: {body}")]
    Fetch { status: u16, body: String },

    /// A batch at or below the minimum size still failed after retries
    #[error("Batch of {size} records failed after retries: {source}")]
    BatchFailed {
        size: usize,
        #[source]
        source: Box<SyncError>,
    },

    /// Record failed structural validation at the ingestion boundary
    #[error("Malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// Source file missing or with an unexpected layout
    #[error("Source file {path}: {reason}")]
    SourceFile { path: PathBuf, reason: String },

    /// Configuration error (missing env vars, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a MalformedRecord error
    pub fn malformed(reason: impl Into<String>) -> Self {
        SyncError::MalformedRecord {
            reason: reason.into(),
        }
    }

    /// Create a SourceFile error
    pub fn source_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::SourceFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether an ingestion attempt that failed with this error may be retried
    /// (and, once retries run out, bisected).
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Server { .. } | SyncError::Transport(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
