//! Verify command implementation.

use super::{read_segment, segment_files, CliError, CliResult};
use kitestore_core::{ChunkId, SegmentFile};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segment files checked.
    pub segments_checked: usize,
    /// Number of chunks checked.
    pub chunks_checked: usize,
    /// Number of chunks whose checksum matched.
    pub valid_chunks: usize,
    /// Number of chunks whose checksum did not match.
    pub corrupt_chunks: usize,
    /// Problems that make the store unreadable in part.
    pub errors: Vec<String>,
    /// Conditions a store recovers from on its own.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_chunks == 0 && self.errors.is_empty()
    }
}

/// Re-parses every segment file and checks every chunk checksum.
///
/// Segments must not overlap. A gap between segments is only a warning:
/// chunks dropped by a failed flush or a removed segment leave one.
pub fn verify_store(path: &Path) -> CliResult<VerifyResult> {
    let files = segment_files(path)?;
    let mut result = VerifyResult::default();
    let mut expected_next: Option<ChunkId> = None;

    for file in &files {
        result.segments_checked += 1;
        let end = verify_segment(file, &mut result);

        if let Some(next) = expected_next {
            if file.start_id < next {
                result.errors.push(format!(
                    "{}: starts at {} but the previous segment ends at {}",
                    file.path.display(),
                    file.start_id,
                    ChunkId::new(next.as_i64() - 1)
                ));
            } else if file.start_id > next {
                result.warnings.push(format!(
                    "ids {} to {} are in no segment",
                    next.as_i64(),
                    file.start_id.as_i64() - 1
                ));
            }
        }
        if end.is_some() {
            expected_next = end;
        }
    }

    Ok(result)
}

/// Checks one segment; returns the id following its last chunk.
fn verify_segment(file: &SegmentFile, result: &mut VerifyResult) -> Option<ChunkId> {
    let parsed = match read_segment(file) {
        Ok(parsed) => parsed,
        Err(e) => {
            result
                .errors
                .push(format!("{}: {e}", file.path.display()));
            return None;
        }
    };

    if parsed.torn {
        result.warnings.push(format!(
            "{}: incomplete chunk after offset {}, truncated on next open",
            file.path.display(),
            parsed.valid_len
        ));
    }

    for chunk in &parsed.chunks {
        result.chunks_checked += 1;
        match chunk.verify() {
            Ok(()) => result.valid_chunks += 1,
            Err(e) => {
                result.corrupt_chunks += 1;
                result.errors.push(format!("{}: {e}", file.path.display()));
            }
        }
    }

    Some(file.start_id.offset(parsed.chunks.len()))
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying store at {}", path.display());
    println!();

    let result = verify_store(path)?;
    println!(
        "  segments checked: {}, chunks checked: {}, valid: {}, corrupt: {}",
        result.segments_checked, result.chunks_checked, result.valid_chunks, result.corrupt_chunks
    );
    for warning in &result.warnings {
        println!("    WARNING: {warning}");
    }
    for error in &result.errors {
        println!("    ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err(CliError::VerifyFailed(result.corrupt_chunks.max(result.errors.len())).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitestore_core::{segment_file_name, Config, SnapshotStore, CHUNK_HEADER_SIZE};
    use std::fs;
    use std::time::Duration;

    fn build_store(path: &Path) {
        let config = Config::default()
            .sync_on_flush(false)
            .max_segment_size(1);
        let store = SnapshotStore::open_with_config(path, config).unwrap();
        for p in ["a", "b", "c"] {
            store.append(p.as_bytes().to_vec()).unwrap();
        }
        assert!(store.flush_pending(Duration::from_secs(5)));
        store.destroy().unwrap();
    }

    #[test]
    fn clean_store_passes() {
        let dir = tempfile::tempdir().unwrap();
        build_store(dir.path());

        let result = verify_store(dir.path()).unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(result.chunks_checked, 3);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn flipped_payload_byte_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        build_store(dir.path());

        let path = dir.path().join(segment_file_name(ChunkId::new(1)));
        let mut bytes = fs::read(&path).unwrap();
        bytes[CHUNK_HEADER_SIZE] ^= 0x20;
        fs::write(&path, bytes).unwrap();

        let result = verify_store(dir.path()).unwrap();
        assert_eq!(result.corrupt_chunks, 1);
        assert!(!result.is_ok());
    }

    #[test]
    fn removed_segment_leaves_a_gap_warning() {
        let dir = tempfile::tempdir().unwrap();
        build_store(dir.path());
        fs::remove_file(dir.path().join(segment_file_name(ChunkId::new(1)))).unwrap();

        let result = verify_store(dir.path()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
    }
}
