//! # EmberKV Storage
//!
//! Segment I/O backends for EmberKV.
//!
//! This crate provides the lowest-level storage abstraction for the
//! engine: a single-file byte store with offset reads and append-only
//! writes. Backends do not interpret the data they store - the engine
//! owns all record format interpretation.
//!
//! ## Available Backends
//!
//! - [`FileIo`] - plain OS file I/O
//! - [`BufferedIo`] - plain file I/O behind a user-space write buffer
//! - [`MmapIo`] - memory-mapped I/O over a pre-sized file, with
//!   per-path shared mappings via [`MmapRegistry`]
//!
//! Backends are selected through [`IoFactory`], which an engine holds
//! for the lifetime of its data directory.
//!
//! ## Example
//!
//! ```no_run
//! use emberkv_storage::{IoFactory, IoKind};
//! use std::path::Path;
//!
//! let factory = IoFactory::new(IoKind::Buffered, 256 * 1024 * 1024);
//! let io = factory.open(Path::new("000000000.data")).unwrap();
//! io.write(b"hello").unwrap();
//! io.sync().unwrap();
//! ```

#![warn(missing_docs)]

mod buffered;
mod error;
mod factory;
mod file;
mod manager;
mod mmap;

pub use buffered::BufferedIo;
pub use error::{IoError, IoResult};
pub use factory::{IoFactory, IoKind};
pub use file::FileIo;
pub use manager::IoManager;
pub use mmap::{MmapIo, MmapRegistry};
