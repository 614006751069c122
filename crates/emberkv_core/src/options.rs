//! Engine configuration.

use crate::error::{EngineError, EngineResult};
use crate::index::IndexKind;
use emberkv_storage::IoKind;
use std::path::PathBuf;

/// Default segment capacity: 256 MiB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

/// Default cap on records in one write batch.
pub const DEFAULT_MAX_BATCH_NUM: u32 = 10_000;

/// Options controlling how an engine opens and runs.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the segment files. Created if absent.
    pub dir_path: PathBuf,
    /// Capacity of one data segment in bytes. When an append would
    /// exceed it the active segment is sealed and a new one opened.
    pub max_segment_size: u64,
    /// Fsync after every write. Durable but slow; off by default.
    pub sync_writes: bool,
    /// I/O backend used for data segments.
    pub io_kind: IoKind,
    /// In-memory index backend.
    pub index_kind: IndexKind,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("emberkv-data"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            sync_writes: false,
            io_kind: IoKind::default(),
            index_kind: IndexKind::default(),
        }
    }
}

impl Options {
    /// Options rooted at `dir_path` with everything else defaulted.
    #[must_use]
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            ..Self::default()
        }
    }

    /// Sets the segment capacity in bytes.
    #[must_use]
    pub const fn max_segment_size(mut self, bytes: u64) -> Self {
        self.max_segment_size = bytes;
        self
    }

    /// Enables or disables fsync-per-write.
    #[must_use]
    pub const fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Selects the I/O backend for data segments.
    #[must_use]
    pub const fn io_kind(mut self, kind: IoKind) -> Self {
        self.io_kind = kind;
        self
    }

    /// Selects the in-memory index backend.
    #[must_use]
    pub const fn index_kind(mut self, kind: IndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(EngineError::invalid_options("dir_path is empty"));
        }
        if self.max_segment_size == 0 {
            return Err(EngineError::invalid_options(
                "max_segment_size must be positive",
            ));
        }
        Ok(())
    }
}

/// Options for one [`WriteBatch`](crate::batch::WriteBatch).
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of staged records a commit will accept.
    pub max_batch_num: u32,
    /// Fsync once after the commit marker is appended.
    pub sync_on_commit: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: DEFAULT_MAX_BATCH_NUM,
            sync_on_commit: true,
        }
    }
}

impl WriteBatchOptions {
    /// Sets the staged record cap.
    #[must_use]
    pub const fn max_batch_num(mut self, max: u32) -> Self {
        self.max_batch_num = max;
        self
    }

    /// Enables or disables the commit-time fsync.
    #[must_use]
    pub const fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }
}

/// Options for one [`DbIterator`](crate::iterator::DbIterator).
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only keys starting with this prefix are visited. Empty matches
    /// every key.
    pub prefix: Vec<u8>,
    /// Visit keys in descending order.
    pub reverse: bool,
}

impl IteratorOptions {
    /// Restricts iteration to keys under `prefix`.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Iterates in descending key order.
    #[must_use]
    pub const fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}
