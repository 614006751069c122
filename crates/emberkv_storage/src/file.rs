//! Plain file I/O backend.

use crate::error::{IoError, IoResult};
use crate::manager::IoManager;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// A plain file I/O backend.
///
/// Reads seek to the requested offset; writes append at the end of the
/// file. The logical size is tracked in memory and seeded from the OS
/// file metadata at open.
///
/// # Thread Safety
///
/// Internal locking makes one handle safe to share across threads,
/// although EmberKV serializes writers at the engine layer.
#[derive(Debug)]
pub struct FileIo {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    closed: AtomicBool,
}

impl FileIo {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            closed: AtomicBool::new(false),
        })
    }

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

impl IoManager for FileIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> IoResult<usize> {
        self.check_open()?;

        let size = *self.size.read();
        let end = offset.saturating_add(buf.len() as u64);
        if offset > size || end > size {
            return Err(IoError::ReadPastEnd {
                offset,
                len: buf.len(),
                size,
            });
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(buf.len())
    }

    fn write(&self, data: &[u8]) -> IoResult<usize> {
        self.check_open()?;

        if data.is_empty() {
            return Ok(0);
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(data.len())
    }

    fn sync(&self) -> IoResult<()> {
        self.check_open()?;
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> IoResult<u64> {
        self.check_open()?;
        Ok(*self.size.read())
    }

    fn truncate(&self, new_size: u64) -> IoResult<()> {
        self.check_open()?;

        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(IoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot grow segment from {} to {new_size} bytes", *size),
            )));
        }

        file.set_len(new_size)?;
        *size = new_size;
        Ok(())
    }

    fn close(&self) -> IoResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000000.data");

        let io = FileIo::open(&path).unwrap();
        assert_eq!(io.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");

        let io = FileIo::open(&path).unwrap();
        assert_eq!(io.write(b"hello").unwrap(), 5);
        assert_eq!(io.write(b" world").unwrap(), 6);
        assert_eq!(io.size().unwrap(), 11);

        let mut buf = vec![0u8; 11];
        io.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");

        let io = FileIo::open(&path).unwrap();
        io.write(b"hello world").unwrap();

        let mut buf = vec![0u8; 5];
        io.read_at(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");

        let io = FileIo::open(&path).unwrap();
        io.write(b"hello").unwrap();

        let mut buf = vec![0u8; 5];
        let result = io.read_at(&mut buf, 10);
        assert!(matches!(result, Err(IoError::ReadPastEnd { .. })));
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");

        {
            let io = FileIo::open(&path).unwrap();
            io.write(b"persistent data").unwrap();
            io.sync().unwrap();
        }

        let io = FileIo::open(&path).unwrap();
        assert_eq!(io.size().unwrap(), 15);

        let mut buf = vec![0u8; 15];
        io.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"persistent data");
    }

    #[test]
    fn closed_handle_rejects_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.data");

        let io = FileIo::open(&path).unwrap();
        io.write(b"x").unwrap();
        io.close().unwrap();

        assert!(matches!(io.write(b"y"), Err(IoError::Closed)));
        assert!(matches!(io.size(), Err(IoError::Closed)));
        // Second close is a no-op.
        assert!(io.close().is_ok());
    }
}
