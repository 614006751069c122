//! Segment files.
//!
//! A [`DataFile`] owns one on-disk segment: its id, its logical write
//! cursor, and an I/O backend. Segments come in three flavors that
//! differ only by filename: numbered data segments
//! (`NNNNNNNNN.data`), the hint-index segment (`hintIndex`) produced
//! by merge, and the merge-completion marker segment (`mergeFina`).

use crate::error::EngineResult;
use crate::record::{Position, Record, RecordHeader, MAX_HEADER_SIZE};
use emberkv_storage::{IoFactory, IoManager};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension of numbered data segments.
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Filename of the hint-index segment.
pub const HINT_FILE_NAME: &str = "hintIndex";

/// Filename of the merge-completion marker segment.
pub const MERGE_FINISHED_FILE_NAME: &str = "mergeFina";

/// One append-only segment file.
pub struct DataFile {
    file_id: u32,
    write_offset: AtomicU64,
    io: Box<dyn IoManager>,
}

/// Returns the path of the numbered segment `file_id` inside `dir`.
#[must_use]
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

impl DataFile {
    /// Opens or creates the numbered data segment `file_id` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot open the file.
    pub fn open(dir: &Path, file_id: u32, factory: &IoFactory) -> EngineResult<Self> {
        let io = factory.open(&data_file_path(dir, file_id))?;
        let write_offset = io.size()?;
        Ok(Self {
            file_id,
            write_offset: AtomicU64::new(write_offset),
            io,
        })
    }

    /// Opens or creates the hint-index segment in `dir`.
    ///
    /// Hint files are written once and read sequentially, so they
    /// always use the plain-file backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn hint_file(dir: &Path, factory: &IoFactory) -> EngineResult<Self> {
        let io = factory.open_standard(&dir.join(HINT_FILE_NAME))?;
        let write_offset = io.size()?;
        Ok(Self {
            file_id: 0,
            write_offset: AtomicU64::new(write_offset),
            io,
        })
    }

    /// Opens or creates the merge-completion marker segment in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn merge_finished_file(dir: &Path, factory: &IoFactory) -> EngineResult<Self> {
        let io = factory.open_standard(&dir.join(MERGE_FINISHED_FILE_NAME))?;
        let write_offset = io.size()?;
        Ok(Self {
            file_id: 0,
            write_offset: AtomicU64::new(write_offset),
            io,
        })
    }

    /// Returns the segment id.
    #[must_use]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the logical write cursor.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    /// Appends encoded bytes, advancing the write cursor by the
    /// written length. The cursor is never advanced on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn append(&self, data: &[u8]) -> EngineResult<()> {
        let n = self.io.write(data)?;
        self.write_offset.fetch_add(n as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns the record and its total encoded length so the caller
    /// can advance its own read cursor, or `None` at end of segment:
    /// an all-zero header, or a header/body that runs past the file
    /// boundary (a torn tail write).
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::ChecksumMismatch`] for a record
    /// whose CRC does not verify, or other decode errors for corrupt
    /// bytes away from the boundary.
    pub fn read_record(&self, offset: u64) -> EngineResult<Option<(Record, u64)>> {
        let size = self.io.size()?;
        if offset >= size {
            return Ok(None);
        }

        // Speculatively read at most a full header, clipped to the
        // remaining bytes.
        let header_len = (MAX_HEADER_SIZE as u64).min(size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        self.io.read_at(&mut header_buf, offset)?;

        let decoded = match RecordHeader::decode(&header_buf) {
            Ok(decoded) => decoded,
            // An unparsable header within reach of the boundary is a
            // torn tail, not corruption.
            Err(_) if header_len < MAX_HEADER_SIZE => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some((header, header_size)) = decoded else {
            return Ok(None);
        };

        let body_len = header.key_len as u64 + header.value_len as u64;
        if offset + header_size as u64 + body_len > size {
            return Ok(None);
        }

        let mut body = vec![0u8; body_len as usize];
        self.io.read_at(&mut body, offset + header_size as u64)?;

        let (key, value) = body.split_at(header.key_len as usize);
        crate::record::verify_crc(header.crc, &header_buf[4..header_size], key, value)?;

        Ok(Some((
            Record {
                key: key.to_vec(),
                value: value.to_vec(),
                kind: header.kind,
            },
            header_size as u64 + body_len,
        )))
    }

    /// Encodes `{key, value: position}` as a normal record and appends
    /// it. Used only by the hint-index segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    pub fn write_hint_record(&self, key: &[u8], position: Position) -> EngineResult<()> {
        let record = Record::normal(key.to_vec(), position.encode());
        let (encoded, _) = record.encode();
        self.append(&encoded)
    }

    /// Truncates the segment to `offset`, discarding the bytes beyond.
    ///
    /// Recovery uses this to drop a torn tail and to re-establish the
    /// logical cursor of a memory-mapped segment after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend truncate fails.
    pub fn truncate(&self, offset: u64) -> EngineResult<()> {
        self.io.truncate(offset)?;
        self.write_offset.store(offset, Ordering::Release);
        Ok(())
    }

    /// Flushes written data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend sync fails.
    pub fn sync(&self) -> EngineResult<()> {
        self.io.sync()?;
        Ok(())
    }

    /// Closes the segment's backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend close fails.
    pub fn close(&self) -> EngineResult<()> {
        self.io.close()?;
        Ok(())
    }
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("file_id", &self.file_id)
            .field("write_offset", &self.write_offset())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use emberkv_storage::IoKind;
    use tempfile::tempdir;

    fn factory() -> IoFactory {
        IoFactory::new(IoKind::Standard, 1024 * 1024)
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, &factory()).unwrap();

        let record = Record::normal(b"name".to_vec(), b"emberkv".to_vec());
        let (encoded, len) = record.encode();
        file.append(&encoded).unwrap();
        assert_eq!(file.write_offset(), len as u64);

        let (decoded, consumed) = file.read_record(0).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, len as u64);
    }

    #[test]
    fn sequential_scan_over_multiple_records() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, &factory()).unwrap();

        let records = [
            Record::normal(b"a".to_vec(), b"1".to_vec()),
            Record::tombstone(b"b".to_vec()),
            Record::normal(b"c".to_vec(), Vec::new()),
        ];
        for record in &records {
            let (encoded, _) = record.encode();
            file.append(&encoded).unwrap();
        }

        let mut offset = 0u64;
        let mut seen = Vec::new();
        while let Some((record, len)) = file.read_record(offset).unwrap() {
            seen.push(record);
            offset += len;
        }
        assert_eq!(seen.as_slice(), &records);
        assert_eq!(offset, file.write_offset());
    }

    #[test]
    fn read_at_end_returns_none() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, &factory()).unwrap();
        assert!(file.read_record(0).unwrap().is_none());
    }

    #[test]
    fn torn_tail_reads_as_end_of_segment() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, &factory()).unwrap();

        let record = Record::normal(b"key".to_vec(), b"a long enough value".to_vec());
        let (encoded, _) = record.encode();
        // Simulate a crash mid-write: only half the record hit disk.
        file.append(&encoded[..encoded.len() / 2]).unwrap();

        assert!(file.read_record(0).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_fails_loudly() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, &factory()).unwrap();

        let record = Record::normal(b"key".to_vec(), b"value".to_vec());
        let (mut encoded, _) = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        file.append(&encoded).unwrap();

        assert!(matches!(
            file.read_record(0),
            Err(crate::EngineError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn hint_record_roundtrip() {
        let dir = tempdir().unwrap();
        let hint = DataFile::hint_file(dir.path(), &factory()).unwrap();

        let pos = Position::new(3, 512);
        hint.write_hint_record(b"key", pos).unwrap();

        let (record, _) = hint.read_record(0).unwrap().unwrap();
        assert_eq!(record.kind, RecordKind::Normal);
        assert_eq!(record.key, b"key");
        assert_eq!(Position::decode(&record.value).unwrap(), pos);
    }

    #[test]
    fn truncate_resets_cursor() {
        let dir = tempdir().unwrap();
        let file = DataFile::open(dir.path(), 0, &factory()).unwrap();

        let (encoded, len) = Record::normal(b"k".to_vec(), b"v".to_vec()).encode();
        file.append(&encoded).unwrap();
        file.append(b"torn tail bytes").unwrap();

        file.truncate(len as u64).unwrap();
        assert_eq!(file.write_offset(), len as u64);
        assert!(file.read_record(len as u64).unwrap().is_none());
    }

    #[test]
    fn numbered_path_is_zero_padded() {
        let dir = tempdir().unwrap();
        let path = data_file_path(dir.path(), 42);
        assert!(path.ends_with("000000042.data"));
    }
}
