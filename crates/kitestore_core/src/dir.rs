//! Store directory management.
//!
//! One store owns one directory:
//!
//! ```text
//! <base_dir>/
//! ├─ LOCK                  # Advisory lock for single-owner access
//! ├─ segment-0.data        # Chunks 0..n
//! ├─ segment-<n>.data      # Chunks n..m
//! └─ ...
//! ```
//!
//! Segment files are named `segment-<start_id>.data`. Files that do not
//! follow that pattern are ignored; files that carry the prefix and suffix
//! but no parseable id are skipped with a warning rather than being given
//! a made-up id.

use crate::error::{CoreError, CoreResult};
use crate::types::ChunkId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name within the store directory.
const LOCK_FILE: &str = "LOCK";
/// Prefix of every segment file name.
pub const SEGMENT_PREFIX: &str = "segment";
/// Suffix of every segment file name.
pub const SEGMENT_SUFFIX: &str = ".data";

/// Returns the file name of the segment starting at `start_id`.
#[must_use]
pub fn segment_file_name(start_id: ChunkId) -> String {
    format!("{SEGMENT_PREFIX}-{}{SEGMENT_SUFFIX}", start_id.as_i64())
}

/// Classification of a directory entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentName {
    /// A well-formed segment file name.
    Segment(ChunkId),
    /// Looks like a segment file but the id cannot be parsed.
    Malformed,
    /// Not a segment file.
    Other,
}

/// Classifies a file name found in the store directory.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> SegmentName {
    let Some(stem) = name.strip_suffix(SEGMENT_SUFFIX) else {
        return SegmentName::Other;
    };
    let Some(id) = stem
        .strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return SegmentName::Other;
    };
    // Only the canonical spelling counts, so `segment-07` and `segment-7`
    // cannot both claim start id 7.
    match id.parse::<i64>() {
        Ok(id) if id >= 0 && segment_file_name(ChunkId::new(id)) == name => {
            SegmentName::Segment(ChunkId::new(id))
        }
        _ => SegmentName::Malformed,
    }
}

/// A segment file found by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    /// Start id parsed from the file name.
    pub start_id: ChunkId,
    /// Full path of the file.
    pub path: PathBuf,
    /// File length in bytes.
    pub size: u64,
}

/// Lists the segment files in `path`, ascending by start id.
///
/// Does not take the directory lock, so it is safe for read-only tools.
pub fn scan_segment_files(path: &Path) -> CoreResult<Vec<SegmentFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            debug!(path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };

        match parse_segment_file_name(name) {
            SegmentName::Segment(start_id) => files.push(SegmentFile {
                start_id,
                path: entry.path(),
                size: metadata.len(),
            }),
            SegmentName::Malformed => {
                warn!(
                    path = %entry.path().display(),
                    "skipping segment file with unparseable start id"
                );
            }
            SegmentName::Other => {
                debug!(name, "ignoring non-segment file");
            }
        }
    }

    files.sort_by_key(|f| f.start_id);
    Ok(files)
}

/// Fsyncs a directory so created, renamed or removed entries are durable.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    // NTFS journals metadata updates; directory handles cannot be fsynced.
    Ok(())
}

/// Owns the store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time, across processes.
/// Dropping it releases the lock.
#[derive(Debug)]
pub struct StoreDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another instance holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the segment starting at `start_id`.
    #[must_use]
    pub fn segment_path(&self, start_id: ChunkId) -> PathBuf {
        self.path.join(segment_file_name(start_id))
    }

    /// Lists the segment files of this store.
    pub fn scan_segments(&self) -> CoreResult<Vec<SegmentFile>> {
        scan_segment_files(&self.path)
    }
}
