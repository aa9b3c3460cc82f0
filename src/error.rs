//! Error types and exit codes.
//!
//! The library surfaces every failure as a [`CacheError`]. The binary wraps
//! those in `anyhow` and maps the outcome onto an [`ExitCode`].

use rusqlite::ErrorCode;
use serde::Serialize;
use std::path::PathBuf;

/// Errors produced by the thumbnail cache.
///
/// A cache error is always recoverable by the caller: the thumbnail can be
/// re-derived from its source image.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// No entry exists for the requested key.
    #[error("Thumbnail not found in cache")]
    NotFound,

    /// The entry exists but is past its retention period.
    #[error("Cached thumbnail has expired")]
    Expired,

    /// The storage engine reported a failure, or the store is not open.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O failure while reading or writing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored data failed validation.
    #[error("Corrupted cache data: {0}")]
    CorruptedData(String),

    /// The storage engine ran out of memory.
    #[error("Out of memory")]
    OutOfMemory,

    /// The path cannot be turned into a cache key.
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    /// The entry already exists.
    #[error("Entry already exists")]
    AlreadyExists,

    /// The payload could not be compressed or decompressed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// The requested operation is not supported.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl CacheError {
    /// Whether this error is a plain cache miss rather than a failure.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired)
    }

    /// Error returned for every operation attempted before the store opened.
    #[must_use]
    pub fn not_ready() -> Self {
        Self::Database("cache store is not open".to_string())
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            rusqlite::Error::SqliteFailure(ref failure, ref message) => {
                let detail = message.clone().unwrap_or_else(|| failure.to_string());
                match failure.code {
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                        Self::CorruptedData(detail)
                    }
                    ErrorCode::OutOfMemory => Self::OutOfMemory,
                    ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::DiskFull
                    | ErrorCode::ReadOnly => Self::Io(std::io::Error::other(detail)),
                    ErrorCode::ConstraintViolation => Self::AlreadyExists,
                    _ => Self::Database(detail),
                }
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Result alias used throughout the cache.
pub type CacheResult<T> = Result<T, CacheError>;

/// Exit codes for the thumbcache binary.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 2: Cache miss (lookup completed, nothing cached)
/// - 3: Store unavailable (database could not be opened)
/// - 4: Invalid input (bad path or image)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: The command completed.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// Miss: The requested thumbnail is not cached.
    Miss = 2,
    /// The persistent store could not be opened.
    StoreUnavailable = 3,
    /// The input path or image was rejected.
    InvalidInput = 4,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "TC000",
            Self::GeneralError => "TC001",
            Self::Miss => "TC002",
            Self::StoreUnavailable => "TC003",
            Self::InvalidInput => "TC004",
        }
    }

    /// Pick the exit code for a failed command.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<CacheError>() {
            Some(e) if e.is_miss() => Self::Miss,
            Some(CacheError::Database(_)) => Self::StoreUnavailable,
            Some(CacheError::InvalidPath(_)) => Self::InvalidInput,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "TC001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
        }
    }
}
