//! Crate-wide error sum type.
//!
//! Every boundary function returns [`Result<T>`]. Variants map onto the
//! error kinds named by the retrieval protocol (`NotFound`,
//! `InvalidArgument`, ..., `Internal`); leaf causes are attached so
//! `tracing` context and tool-call error payloads can carry useful detail.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RepolensError>;

#[derive(Debug, Error)]
pub enum RepolensError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("embedder unavailable: {provider}")]
    EmbedderUnavailable { provider: String },

    #[error("embedder request failed after retries: {cause}")]
    EmbedderTransient { cause: String },

    #[error("embedder returned {got}-dim vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("storage error: {cause}")]
    StorageError { cause: String },

    #[error("sqlite error at {path}: {cause}")]
    SqliteError { path: PathBuf, cause: String },

    #[error("postgres error: {cause}")]
    PostgresError { cause: String },

    #[error("index lock held for {repo_root}: {lock_path}")]
    IndexInProgress {
        repo_root: PathBuf,
        lock_path: PathBuf,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error in field {field}: {cause}")]
    ConfigError { field: String, cause: String },

    #[error("failed to parse config: {cause}")]
    ConfigParseError { cause: String },

    #[error("failed to read {path}: {cause}")]
    FileReadFailed { path: PathBuf, cause: String },

    #[error("unsupported language for {path}")]
    UnsupportedLanguage { path: PathBuf },

    #[error("chunking failed for {path}: {cause}")]
    ChunkingFailed { path: PathBuf, cause: String },

    #[error("snapshot corrupt: {cause}")]
    SnapshotCorrupt { cause: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl RepolensError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn sqlite_error(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::SqliteError {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// Exit code per the tool protocol's documented mapping.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } | Self::ConfigError { .. } | Self::ConfigParseError { .. } => 1,
            Self::EmbedderUnavailable { .. } => 2,
            Self::StorageError { .. } | Self::SqliteError { .. } | Self::PostgresError { .. } => 3,
            Self::IndexInProgress { .. } => 4,
            _ => 1,
        }
    }
}

impl From<rusqlite::Error> for RepolensError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StorageError { cause: e.to_string() }
    }
}

impl From<sqlx::Error> for RepolensError {
    fn from(e: sqlx::Error) -> Self {
        Self::PostgresError { cause: e.to_string() }
    }
}

impl From<std::io::Error> for RepolensError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageError { cause: e.to_string() }
    }
}
