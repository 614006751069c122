//! # EmberKV Core
//!
//! Log-structured key-value engine over append-only segments.
//!
//! This crate provides:
//! - CRC-checked record codec with transaction sequence prefixes
//! - Segment files over pluggable I/O backends
//! - In-memory index with selectable backends
//! - Engine with atomic write batches and iterators
//! - Merge/compaction with hint-index fast recovery
//!
//! ```no_run
//! use emberkv_core::{Db, Options};
//!
//! # fn main() -> emberkv_core::EngineResult<()> {
//! let db = Db::open(Options::new("/tmp/emberkv"))?;
//! db.put(b"greeting", b"hello")?;
//! assert_eq!(db.get(b"greeting")?, b"hello");
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod data_file;
pub mod db;
pub mod error;
pub mod index;
pub mod iterator;
pub mod merge;
pub mod options;
pub mod record;

pub use batch::WriteBatch;
pub use db::{Db, Stat};
pub use error::{EngineError, EngineResult};
pub use index::{IndexKind, Indexer};
pub use iterator::DbIterator;
pub use options::{IteratorOptions, Options, WriteBatchOptions};
pub use record::{Position, Record, RecordKind};

pub use emberkv_storage::IoKind;
