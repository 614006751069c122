//! Error types for segment I/O.

use std::io;
use thiserror::Error;

/// Result type for I/O manager operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors that can occur in a segment I/O backend.
#[derive(Debug, Error)]
pub enum IoError {
    /// An OS-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the segment.
    #[error("read beyond end of segment: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current logical size.
        size: u64,
    },

    /// A write would exceed the fixed segment capacity.
    ///
    /// Only the memory-mapped backend can report this; callers are
    /// expected to rotate segments before reaching capacity.
    #[error("segment full: write needs {requested} bytes, capacity is {capacity}")]
    SegmentFull {
        /// Total bytes the segment would hold after the write.
        requested: u64,
        /// Fixed capacity of the segment.
        capacity: u64,
    },

    /// The backend has already been closed.
    #[error("segment backend is closed")]
    Closed,
}
