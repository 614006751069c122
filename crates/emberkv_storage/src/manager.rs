//! I/O manager trait definition.

use crate::error::IoResult;

/// A single-file I/O manager for EmberKV segments.
///
/// I/O managers are **opaque byte stores** over exactly one on-disk
/// file. They provide offset reads, append-only writes, and durability
/// control. EmberKV owns all record format interpretation - backends do
/// not understand records, segments, or hint files.
///
/// # Invariants
///
/// - `write` appends at the current logical size and returns the number
///   of bytes written
/// - `read_at` returns exactly the bytes previously written at that
///   offset
/// - `size` reports the logical size (the offset the next `write` will
///   use), which for the memory-mapped backend can be smaller than the
///   physical file size
/// - All methods take `&self`; backends lock internally so one handle
///   can be shared behind `Arc`
///
/// # Implementors
///
/// - [`crate::FileIo`] - plain OS file I/O
/// - [`crate::BufferedIo`] - buffered writes over plain file I/O
/// - [`crate::MmapIo`] - memory-mapped I/O with a fixed capacity
pub trait IoManager: Send + Sync {
    /// Fills `buf` with bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is always `buf.len()`
    /// on success.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IoError::ReadPastEnd`] if the read would extend
    /// beyond the logical size, or an I/O error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IoResult<usize>;

    /// Appends `data` at the current logical size.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IoError::SegmentFull`] if the backend has a
    /// fixed capacity and the write would exceed it, or an I/O error.
    fn write(&self, data: &[u8]) -> IoResult<usize>;

    /// Flushes all written data to durable storage.
    fn sync(&self) -> IoResult<()>;

    /// Returns the logical size in bytes.
    fn size(&self) -> IoResult<u64>;

    /// Truncates the backend to `new_size` logical bytes.
    ///
    /// Used by recovery to discard a torn tail after replay. `new_size`
    /// must not exceed the current logical size.
    fn truncate(&self, new_size: u64) -> IoResult<()>;

    /// Releases the backend.
    ///
    /// For buffered backends this flushes the write buffer; for the
    /// memory-mapped backend this truncates the file to the logical
    /// cursor, flushes, and unmaps (on the last shared handle).
    /// Calling any other method after `close` returns
    /// [`crate::IoError::Closed`].
    fn close(&self) -> IoResult<()>;
}
