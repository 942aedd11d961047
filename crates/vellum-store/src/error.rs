use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from the on-disk backend.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend schema migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The storage medium cannot be used at all.
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Serialized snapshot is larger than the configured budget. Nothing was
    /// written.
    #[error("Snapshot is {size} bytes, over the {budget} byte budget")]
    QuotaExceeded { size: usize, budget: usize },

    /// Backup payload could not be parsed or failed validation. Nothing was
    /// written.
    #[error("Malformed backup: {0}")]
    MalformedBackup(String),

    /// Stored snapshot could not be parsed.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Stored snapshot was written by a newer build.
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(String),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification handed to callers that only need to decide how to
/// react (retry later, prompt for cleanup, warn).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    QuotaExceeded,
    BackendUnavailable,
    MalformedBackup,
    Corrupt,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::QuotaExceeded { .. } => StoreErrorKind::QuotaExceeded,
            StoreError::Sqlite(_)
            | StoreError::NoDataDir
            | StoreError::Io(_)
            | StoreError::Migration(_)
            | StoreError::BackendUnavailable(_) => StoreErrorKind::BackendUnavailable,
            StoreError::MalformedBackup(_) => StoreErrorKind::MalformedBackup,
            StoreError::CorruptSnapshot(_)
            | StoreError::UnsupportedVersion(_)
            | StoreError::Serialization(_) => StoreErrorKind::Corrupt,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
