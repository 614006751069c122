//! Merge and compaction.
//!
//! Merging rewrites the sealed segments into a sibling directory,
//! keeping only records the live index still points at, then marks
//! completion with a boundary record. The next open promotes the
//! compacted files into the main directory and uses the hint index
//! written alongside them to skip replaying the merged range.

use crate::data_file::{data_file_path, DataFile, MERGE_FINISHED_FILE_NAME};
use crate::db::{Db, FILE_LOCK_NAME};
use crate::error::{EngineError, EngineResult};
use crate::options::Options;
use crate::record::{decode_record_key, encode_record_key, Position, Record, RecordKind,
    NON_TXN_SEQ_NO};
use emberkv_storage::{IoFactory, IoKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Suffix appended to the data directory name to form the merge
/// directory.
const MERGE_DIR_SUFFIX: &str = "dbmerge";

/// Key of the single record inside the merge-completion marker file.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Returns the sibling merge directory for `dir`.
fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(MERGE_DIR_SUFFIX);
    dir.parent().unwrap_or_else(|| Path::new(".")).join(name)
}

/// Clears the merging flag when a merge ends, normally or not.
struct MergeFlagGuard<'a>(&'a AtomicBool);

impl Drop for MergeFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Db {
    /// Compacts the sealed segments, dropping superseded records and
    /// tombstones.
    ///
    /// The rewrite happens in a sibling directory and becomes
    /// effective at the next open; a failure at any step leaves the
    /// main directory untouched. Reads and writes proceed normally
    /// while the merge runs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MergeInProgress`] when a merge is
    /// already running, or an I/O error from the rewrite.
    pub fn merge(&self) -> EngineResult<()> {
        {
            let inner = self.inner.read();
            if inner.older.is_empty() && inner.active.write_offset() == 0 {
                return Ok(());
            }
        }

        if self
            .merging
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::MergeInProgress);
        }
        let _guard = MergeFlagGuard(&self.merging);

        // Seal the current active so everything below the boundary is
        // immutable for the duration of the merge.
        let (boundary, mut snapshot) = {
            let mut inner = self.inner.write();
            self.rotate_active(&mut inner)?;
            let boundary = inner.active.file_id();
            let snapshot: Vec<Arc<DataFile>> = inner.older.values().cloned().collect();
            (boundary, snapshot)
        };
        snapshot.sort_by_key(|file| file.file_id());

        let merge_dir = merge_path(&self.options.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let merge_options = Options::new(&merge_dir)
            .max_segment_size(self.options.max_segment_size)
            .io_kind(self.options.io_kind)
            .index_kind(self.options.index_kind)
            .sync_writes(false);
        let merge_db = Db::open(merge_options)?;
        let hint = DataFile::hint_file(&merge_dir, &merge_db.io_factory)?;

        let mut survivors = 0usize;
        let mut scanned = 0usize;
        for file in &snapshot {
            let mut offset = 0u64;
            while let Some((record, len)) = file.read_record(offset)? {
                scanned += 1;
                if record.kind == RecordKind::Normal {
                    let (key, _) = decode_record_key(&record.key)?;
                    let here = Position::new(file.file_id(), offset as i64);
                    // Only the record the live index points at survives.
                    if self.index.get(&key) == Some(here) {
                        let rewritten =
                            Record::normal(encode_record_key(&key, NON_TXN_SEQ_NO), record.value);
                        let position = {
                            let mut inner = merge_db.inner_write();
                            merge_db.append_record_locked(&mut inner, &rewritten)?
                        };
                        hint.write_hint_record(&key, position)?;
                        survivors += 1;
                    }
                }
                offset += len;
            }
        }

        merge_db.sync()?;
        hint.sync()?;
        hint.close()?;

        let marker = DataFile::merge_finished_file(&merge_dir, &merge_db.io_factory)?;
        let record = Record::normal(
            MERGE_FINISHED_KEY.to_vec(),
            boundary.to_string().into_bytes(),
        );
        let (encoded, _) = record.encode();
        marker.append(&encoded)?;
        marker.sync()?;
        marker.close()?;

        merge_db.close()?;
        self.reset_reclaimable();

        info!(scanned, survivors, boundary, "merge finished");
        Ok(())
    }
}

/// Promotes a completed merge snapshot into `dir`, then discards the
/// merge directory. An incomplete snapshot (no completion marker) is
/// discarded outright. Called before segments are opened.
pub(crate) fn load_merge_files(dir: &Path) -> EngineResult<()> {
    let merge_dir = merge_path(dir);
    if !merge_dir.is_dir() {
        return Ok(());
    }

    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
        warn!(dir = %merge_dir.display(), "discarding incomplete merge");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let boundary = read_merge_boundary(&merge_dir)?;

    // The merged range is fully replaced: drop its old segments first,
    // then move the compacted files in.
    for file_id in 0..boundary {
        let path = data_file_path(dir, file_id);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }

    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str() == Some(FILE_LOCK_NAME) {
            continue;
        }
        fs::rename(entry.path(), dir.join(&name))?;
    }
    fs::remove_dir_all(&merge_dir)?;

    info!(boundary, "merge snapshot promoted");
    Ok(())
}

/// Reads the first-non-merged segment id from a completion marker.
fn read_merge_boundary(merge_dir: &Path) -> EngineResult<u32> {
    let factory = IoFactory::new(IoKind::Standard, 0);
    let marker = DataFile::merge_finished_file(merge_dir, &factory)?;
    let Some((record, _)) = marker.read_record(0)? else {
        return Err(EngineError::invalid_data_dir("empty merge-finished marker"));
    };
    let text = std::str::from_utf8(&record.value)
        .map_err(|_| EngineError::invalid_data_dir("merge boundary is not UTF-8"))?;
    text.parse::<u32>()
        .map_err(|_| EngineError::invalid_data_dir("merge boundary is not a number"))
}
