//! Backend selection and construction.

use crate::buffered::BufferedIo;
use crate::error::IoResult;
use crate::file::FileIo;
use crate::manager::IoManager;
use crate::mmap::MmapRegistry;
use std::path::Path;
use std::sync::Arc;

/// Which I/O backend a factory constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoKind {
    /// Buffered file I/O (default).
    #[default]
    Buffered,
    /// Plain OS file I/O.
    Standard,
    /// Memory-mapped I/O with fixed segment capacity.
    MemoryMap,
}

/// Constructs I/O managers for segment files.
///
/// One factory serves a whole engine instance. It owns the
/// [`MmapRegistry`] so mapped handles for the same path are shared and
/// the release sequence runs on the last close.
#[derive(Debug, Clone)]
pub struct IoFactory {
    kind: IoKind,
    /// Capacity for memory-mapped segments.
    capacity: u64,
    registry: Arc<MmapRegistry>,
}

impl IoFactory {
    /// Creates a factory producing backends of `kind`.
    ///
    /// `capacity` is the fixed segment capacity used by the
    /// memory-mapped backend; the other backends ignore it.
    #[must_use]
    pub fn new(kind: IoKind, capacity: u64) -> Self {
        Self {
            kind,
            capacity,
            registry: Arc::new(MmapRegistry::new()),
        }
    }

    /// Returns the kind of backend this factory constructs.
    #[must_use]
    pub fn kind(&self) -> IoKind {
        self.kind
    }

    /// Opens a backend for the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(&self, path: &Path) -> IoResult<Box<dyn IoManager>> {
        Ok(match self.kind {
            IoKind::Standard => Box::new(FileIo::open(path)?),
            IoKind::Buffered => Box::new(BufferedIo::open(path)?),
            IoKind::MemoryMap => Box::new(self.registry.open(path, self.capacity)?),
        })
    }

    /// Opens a plain-file backend regardless of the configured kind.
    ///
    /// Hint and marker files are written once and read sequentially;
    /// mapping them would waste a full segment capacity of zeros.
    pub fn open_standard(&self, path: &Path) -> IoResult<Box<dyn IoManager>> {
        Ok(Box::new(FileIo::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn factory_builds_each_kind() {
        let dir = tempdir().unwrap();

        for kind in [IoKind::Standard, IoKind::Buffered, IoKind::MemoryMap] {
            let factory = IoFactory::new(kind, 1024);
            let path = dir.path().join(format!("{kind:?}.data"));
            let io = factory.open(&path).unwrap();
            io.write(b"abc").unwrap();

            let mut buf = vec![0u8; 3];
            io.read_at(&mut buf, 0).unwrap();
            assert_eq!(&buf, b"abc");
            io.close().unwrap();
        }
    }

    #[test]
    fn mmap_factory_shares_registry() {
        let dir = tempdir().unwrap();
        let factory = IoFactory::new(IoKind::MemoryMap, 1024);
        let path = dir.path().join("seg.data");

        let a = factory.open(&path).unwrap();
        a.write(b"one").unwrap();

        let b = factory.open(&path).unwrap();
        assert_eq!(b.size().unwrap(), 3);

        a.close().unwrap();
        b.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3);
    }
}
