//! Buffered file I/O backend.

use crate::error::{IoError, IoResult};
use crate::manager::IoManager;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Size of the user-space write buffer.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A buffered file I/O backend.
///
/// Writes go through a user-space [`BufWriter`] for throughput; reads
/// use a second handle on the same file. The write buffer is flushed
/// before any read so a reader always observes its own writes, and on
/// `close`.
#[derive(Debug)]
pub struct BufferedIo {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    reader: Mutex<File>,
    size: RwLock<u64>,
    closed: AtomicBool,
}

impl BufferedIo {
    /// Opens or creates a buffered backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> IoResult<Self> {
        let write_file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)?;
        let read_file = OpenOptions::new().read(true).open(path)?;

        let size = write_file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, write_file)),
            reader: Mutex::new(read_file),
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

impl IoManager for BufferedIo {
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

        // Buffered bytes must reach the file before the read handle
        // can observe them.
        self.writer.lock().flush()?;

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)?;

        Ok(buf.len())
    }

    fn write(&self, data: &[u8]) -> IoResult<usize> {
        self.check_open()?;

        if data.is_empty() {
            return Ok(0);
        }

        let mut writer = self.writer.lock();
        let mut size = self.size.write();

        writer.write_all(data)?;
        *size += data.len() as u64;

        Ok(data.len())
    }

    fn sync(&self) -> IoResult<()> {
        self.check_open()?;
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn size(&self) -> IoResult<u64> {
        self.check_open()?;
        Ok(*self.size.read())
    }

    fn truncate(&self, new_size: u64) -> IoResult<()> {
        self.check_open()?;

        let mut writer = self.writer.lock();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(IoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot grow segment from {} to {new_size} bytes", *size),
            )));
        }

        writer.flush()?;
        writer.get_ref().set_len(new_size)?;
        *size = new_size;
        Ok(())
    }

    fn close(&self) -> IoResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}
