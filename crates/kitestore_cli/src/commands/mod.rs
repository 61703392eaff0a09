//! CLI command implementations.

pub mod dump;
pub mod head;
pub mod inspect;
pub mod query;
pub mod remove_segment;
pub mod verify;

use kitestore_core::{
    parse_chunks, scan_segment_files, Chunk, ChunkId, Config, ParsedSegment, SegmentFile,
    SnapshotStore,
};
use kitestore_storage::{FileBackend, StorageBackend};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Failures reported by the commands themselves.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no segment files.
    #[error("no segment files found in {0}")]
    NoSegments(String),

    /// No segment starts at the requested id.
    #[error("no segment starts at {0}")]
    SegmentNotFound(ChunkId),

    /// No chunk with the requested id.
    #[error("{0} not found")]
    ChunkNotFound(ChunkId),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerifyFailed(usize),
}

/// Lists segment files, failing if there are none.
pub fn segment_files(path: &Path) -> CliResult<Vec<SegmentFile>> {
    let files = scan_segment_files(path)?;
    if files.is_empty() {
        return Err(CliError::NoSegments(path.display().to_string()).into());
    }
    Ok(files)
}

/// Reads and parses one segment file without opening a store.
///
/// The file is only read, so a torn tail is reported, not repaired.
pub fn read_segment(file: &SegmentFile) -> CliResult<ParsedSegment> {
    let backend = FileBackend::open_existing(&file.path)?;
    let data = backend.read_all()?;
    debug!(path = %file.path.display(), bytes = data.len(), "read segment file");
    Ok(parse_chunks(file.start_id, &data)?)
}

/// Opens an existing store for the online commands.
pub fn open_store(path: &Path) -> CliResult<SnapshotStore> {
    let config = Config::default().create_if_missing(false).segment_cache_size(1);
    Ok(SnapshotStore::open_with_config(path, config)?)
}

/// Renders a payload for terminal output.
pub fn preview(payload: &[u8], max: usize) -> String {
    let shown = &payload[..payload.len().min(max)];
    let text = match std::str::from_utf8(shown) {
        Ok(s) if !s.chars().any(char::is_control) => format!("{s:?}"),
        _ => shown.iter().map(|b| format!("{b:02x}")).collect::<String>(),
    };
    if payload.len() > max {
        format!("{text}…")
    } else {
        text
    }
}

/// Prints one chunk on a single line.
pub fn print_chunk(chunk: &Chunk, max_preview: usize) {
    let status = if chunk.is_deleted() { "deleted" } else { "normal" };
    println!(
        "  {:>10}  {:<7}  {:>8} B  {}",
        chunk.id.as_i64(),
        status,
        chunk.payload.len(),
        preview(&chunk.payload, max_preview)
    );
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_text_and_binary() {
        assert_eq!(preview(b"hello", 16), "\"hello\"");
        assert_eq!(preview(&[0x00, 0xff], 16), "00ff");
        assert_eq!(preview(b"abcdef", 3), "\"abc\"…");
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn empty_directory_has_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        assert!(segment_files(dir.path()).is_err());
    }
}
