//! Error types for the EmberKV engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in EmberKV engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Segment I/O backend error.
    #[error("storage error: {0}")]
    Storage(#[from] emberkv_storage::IoError),

    /// I/O error outside the segment backends (directory handling,
    /// lock file, merge promotion).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key passed to an operation was empty.
    #[error("key is empty")]
    EmptyKey,

    /// The key was not found in the index.
    #[error("key not found")]
    KeyNotFound,

    /// The engine options are invalid.
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// Description of the problem.
        message: String,
    },

    /// A record failed its CRC32 integrity check.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the decoded bytes.
        actual: u32,
    },

    /// The data directory contains an invalid or corrupted file.
    #[error("invalid data directory: {message}")]
    InvalidDataDir {
        /// Description of the problem.
        message: String,
    },

    /// The index claims a position in a segment that does not exist.
    ///
    /// This signals index/log inconsistency and is a consistency bug,
    /// not a routine not-found.
    #[error("data file not found for segment {file_id}")]
    DataFileNotFound {
        /// Segment id the index pointed at.
        file_id: u32,
    },

    /// The index rejected an update after a successful disk append.
    ///
    /// The appended record stays on disk as a harmless tail write; the
    /// log remains the source of truth and a reopen re-derives the
    /// index.
    #[error("index update failed")]
    IndexUpdateFailed,

    /// A merge is already running.
    #[error("merge already in progress")]
    MergeInProgress,

    /// A write batch exceeded its configured maximum.
    #[error("batch too large: {count} staged records, maximum {max}")]
    BatchTooLarge {
        /// Records staged in the batch.
        count: usize,
        /// Configured maximum.
        max: u32,
    },

    /// Another process holds the data directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,
}

impl EngineError {
    /// Creates an invalid-options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Creates an invalid-data-directory error.
    pub fn invalid_data_dir(message: impl Into<String>) -> Self {
        Self::InvalidDataDir {
            message: message.into(),
        }
    }
}
