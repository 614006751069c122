//! Memory-mapped I/O backend.
//!
//! Mapped segments have a fixed capacity: the backing file is
//! pre-truncated to the maximum segment size and mapped once. Writes
//! are memory copies at a logical cursor; `size()` reports the cursor,
//! not the mapped capacity. On the last close of a path the mapping is
//! flushed and dropped, then the file is truncated back down to the
//! cursor.
//!
//! Mappings are shared per path through [`MmapRegistry`], so several
//! logical opens of the same segment use one mapping and the release
//! sequence runs exactly once.

use crate::error::{IoError, IoResult};
use crate::manager::IoManager;
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One mapped file, shared by every open handle on the same path.
#[derive(Debug)]
struct MmapShared {
    file: File,
    /// `None` once released; every handle is closed by then.
    map: RwLock<Option<MmapMut>>,
    /// Logical end of written data; everything past it is zero fill.
    cursor: RwLock<u64>,
    capacity: u64,
}

impl MmapShared {
    fn open(path: &Path, capacity: u64) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // An existing file keeps its data; the cursor starts at its
        // current length. A file left at full capacity by a crash gets
        // its true end re-established by recovery via `truncate`.
        let existing = file.metadata()?.len();
        let capacity = capacity.max(existing).max(1);
        file.set_len(capacity)?;

        // Mapping a file descriptor is inherently unsafe: the map is
        // only valid while no other process resizes the file. The
        // engine guarantees single-process access via its directory
        // lock.
        #[allow(unsafe_code)]
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            file,
            map: RwLock::new(Some(map)),
            cursor: RwLock::new(existing),
            capacity,
        })
    }

    /// Flush-unmap-truncate release sequence; runs once, on the last
    /// close.
    fn release(&self) -> IoResult<()> {
        let cursor = *self.cursor.read();
        // The mapping must be gone before the file shrinks; truncating
        // a still-mapped file is rejected on some platforms.
        if let Some(map) = self.map.write().take() {
            map.flush()?;
            drop(map);
        }
        self.file.set_len(cursor)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Registry of shared mappings keyed by canonical path.
///
/// Owned by the I/O factory; hands out reference-counted handles so
/// the release sequence (flush, unmap, truncate) runs exactly once,
/// when the last handle for a path closes.
#[derive(Debug, Default)]
pub struct MmapRegistry {
    entries: Mutex<HashMap<PathBuf, (Arc<MmapShared>, usize)>>,
}

impl MmapRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a mapped handle for `path`, sharing an existing mapping
    /// when one is already open.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open(self: &Arc<Self>, path: &Path, capacity: u64) -> IoResult<MmapIo> {
        let mut entries = self.entries.lock();

        let shared = match entries.get_mut(path) {
            Some((shared, refs)) => {
                *refs += 1;
                Arc::clone(shared)
            }
            None => {
                let shared = Arc::new(MmapShared::open(path, capacity)?);
                entries.insert(path.to_path_buf(), (Arc::clone(&shared), 1));
                shared
            }
        };

        Ok(MmapIo {
            path: path.to_path_buf(),
            shared,
            registry: Arc::clone(self),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of live mappings (for tests and diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no mappings are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn release(&self, path: &Path) -> IoResult<()> {
        let mut entries = self.entries.lock();

        let Some((shared, refs)) = entries.get_mut(path) else {
            return Ok(());
        };

        *refs -= 1;
        if *refs == 0 {
            let shared = Arc::clone(shared);
            entries.remove(path);
            drop(entries);
            shared.release()?;
        }
        Ok(())
    }
}

/// A memory-mapped I/O backend handle.
///
/// Cheap to open for a path that is already mapped; the heavy state
/// lives in the registry's shared mapping.
#[derive(Debug)]
pub struct MmapIo {
    path: PathBuf,
    shared: Arc<MmapShared>,
    registry: Arc<MmapRegistry>,
    closed: AtomicBool,
}

impl MmapIo {
    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> IoResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IoError::Closed);
        }
        Ok(())
    }
}

impl IoManager for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IoResult<usize> {
        self.check_open()?;

        let cursor = *self.shared.cursor.read();
        let end = offset.saturating_add(buf.len() as u64);
        if offset > cursor || end > cursor {
            return Err(IoError::ReadPastEnd {
                offset,
                len: buf.len(),
                size: cursor,
            });
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let map = self.shared.map.read();
        let map = map.as_ref().ok_or(IoError::Closed)?;
        buf.copy_from_slice(&map[offset as usize..end as usize]);
        Ok(buf.len())
    }

    fn write(&self, data: &[u8]) -> IoResult<usize> {
        self.check_open()?;

        if data.is_empty() {
            return Ok(0);
        }

        let mut map = self.shared.map.write();
        let map = map.as_mut().ok_or(IoError::Closed)?;
        let mut cursor = self.shared.cursor.write();

        let end = *cursor + data.len() as u64;
        if end > self.shared.capacity {
            return Err(IoError::SegmentFull {
                requested: end,
                capacity: self.shared.capacity,
            });
        }

        map[*cursor as usize..end as usize].copy_from_slice(data);
        *cursor = end;

        Ok(data.len())
    }

    fn sync(&self) -> IoResult<()> {
        self.check_open()?;
        self.shared.map.read().as_ref().ok_or(IoError::Closed)?.flush()?;
        Ok(())
    }

    fn size(&self) -> IoResult<u64> {
        self.check_open()?;
        Ok(*self.shared.cursor.read())
    }

    fn truncate(&self, new_size: u64) -> IoResult<()> {
        self.check_open()?;

        let mut map = self.shared.map.write();
        let map = map.as_mut().ok_or(IoError::Closed)?;
        let mut cursor = self.shared.cursor.write();

        if new_size > *cursor {
            return Err(IoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot grow segment from {} to {new_size} bytes", *cursor),
            )));
        }

        // Zero the abandoned tail so end-of-segment scans never see
        // stale record bytes past the cursor.
        map[new_size as usize..*cursor as usize].fill(0);
        *cursor = new_size;
        Ok(())
    }

    fn close(&self) -> IoResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.registry.release(&self.path)
    }
}

impl Drop for MmapIo {
    fn drop(&mut self) {
        // Best effort; errors surface through explicit close.
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CAP: u64 = 4096;

    #[test]
    fn write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let io = registry.open(&path, CAP).unwrap();
        assert_eq!(io.write(b"hello").unwrap(), 5);
        assert_eq!(io.size().unwrap(), 5);

        let mut buf = vec![0u8; 5];
        io.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn size_is_cursor_not_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let io = registry.open(&path, CAP).unwrap();
        io.write(b"abc").unwrap();

        assert_eq!(io.size().unwrap(), 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), CAP);
    }

    #[test]
    fn write_past_capacity_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let io = registry.open(&path, 8).unwrap();
        io.write(b"12345678").unwrap();

        assert!(matches!(
            io.write(b"9"),
            Err(IoError::SegmentFull { .. })
        ));
    }

    #[test]
    fn close_truncates_to_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let io = registry.open(&path, CAP).unwrap();
        io.write(b"payload").unwrap();
        io.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn handles_share_one_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let a = registry.open(&path, CAP).unwrap();
        let b = registry.open(&path, CAP).unwrap();
        assert_eq!(registry.len(), 1);

        a.write(b"shared").unwrap();

        // Second handle observes the first handle's write.
        let mut buf = vec![0u8; 6];
        b.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"shared");

        // First close keeps the mapping alive.
        a.close().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), CAP);

        // Last close releases and truncates.
        b.close().unwrap();
        assert!(registry.is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 6);
    }

    #[test]
    fn release_unmaps_before_truncating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let io = registry.open(&path, CAP).unwrap();
        io.write(b"tail").unwrap();
        io.close().unwrap();

        // The shared mapping is gone, not just the handle.
        assert!(io.shared.map.read().is_none());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4);

        // A closed handle rejects everything instead of touching the
        // released mapping.
        assert!(matches!(io.write(b"x"), Err(IoError::Closed)));
        assert!(matches!(io.sync(), Err(IoError::Closed)));
        assert!(matches!(io.size(), Err(IoError::Closed)));
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        {
            let io = registry.open(&path, CAP).unwrap();
            io.write(b"kept").unwrap();
            io.close().unwrap();
        }

        let io = registry.open(&path, CAP).unwrap();
        assert_eq!(io.size().unwrap(), 4);

        let mut buf = vec![0u8; 4];
        io.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"kept");
    }

    #[test]
    fn truncate_zeroes_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");
        let registry = Arc::new(MmapRegistry::new());

        let io = registry.open(&path, CAP).unwrap();
        io.write(b"abcdef").unwrap();
        io.truncate(2).unwrap();
        assert_eq!(io.size().unwrap(), 2);

        io.write(b"XY").unwrap();
        let mut buf = vec![0u8; 4];
        io.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abXY");
    }
}
