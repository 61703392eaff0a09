//! Inspect command implementation.

use super::{format_size, read_segment, segment_files, CliResult};
use kitestore_core::SegmentFile;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of segment files.
    pub segment_count: usize,
    /// Total size of all segment files in bytes.
    pub total_size: u64,
    /// Number of readable chunks.
    pub chunk_count: usize,
    /// Number of soft-deleted chunks.
    pub deleted_count: usize,
    /// Id the next append would receive, if the last segment is readable.
    pub next_id: Option<i64>,
    /// Per-segment details.
    pub segments: Vec<SegmentSummary>,
}

/// Summary of one segment file.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// First id of the segment.
    pub start_id: i64,
    /// File name.
    pub file: String,
    /// File size in bytes.
    pub size: u64,
    /// Complete chunks in the file.
    pub chunks: usize,
    /// Soft-deleted chunks.
    pub deleted: usize,
    /// Id of the last complete chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<i64>,
    /// Whether the file ends in an incomplete chunk.
    pub torn: bool,
    /// Parse failure, if the file could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summarizes a single segment file.
pub fn summarize(file: &SegmentFile) -> SegmentSummary {
    let mut summary = SegmentSummary {
        start_id: file.start_id.as_i64(),
        file: file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: file.size,
        chunks: 0,
        deleted: 0,
        last_id: None,
        torn: false,
        error: None,
    };

    match read_segment(file) {
        Ok(parsed) => {
            summary.chunks = parsed.chunks.len();
            summary.deleted = parsed.chunks.iter().filter(|c| c.is_deleted()).count();
            summary.last_id = parsed.chunks.last().map(|c| c.id.as_i64());
            summary.torn = parsed.torn;
        }
        Err(e) => summary.error = Some(e.to_string()),
    }
    summary
}

/// Runs the inspect command.
pub fn run(path: &Path, show_segments: bool, format: &str) -> CliResult<()> {
    let files = segment_files(path)?;
    let segments: Vec<SegmentSummary> = files.iter().map(summarize).collect();

    let next_id = segments
        .last()
        .and_then(|s| s.error.is_none().then_some(s.start_id + s.chunks as i64));

    let result = InspectResult {
        path: path.display().to_string(),
        segment_count: segments.len(),
        total_size: segments.iter().map(|s| s.size).sum(),
        chunk_count: segments.iter().map(|s| s.chunks).sum(),
        deleted_count: segments.iter().map(|s| s.deleted).sum(),
        next_id,
        segments,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result, show_segments);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult, show_segments: bool) {
    println!("KiteStore Inspection");
    println!("====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Segments:    {}", result.segment_count);
    println!("  Total size:  {}", format_size(result.total_size));
    println!();
    println!("Chunks:");
    println!("  Stored:      {}", result.chunk_count);
    println!("  Deleted:     {}", result.deleted_count);
    match result.next_id {
        Some(id) => println!("  Next id:     {id}"),
        None => println!("  Next id:     unknown (last segment unreadable)"),
    }

    if show_segments {
        println!();
        println!("Segments:");
        for s in &result.segments {
            let mut line = format!(
                "  {:<28} {:>10}  {:>6} chunks  {:>6} deleted",
                s.file,
                format_size(s.size),
                s.chunks,
                s.deleted
            );
            if s.torn {
                line.push_str("  [torn tail]");
            }
            if let Some(err) = &s.error {
                line.push_str(&format!("  [error: {err}]"));
            }
            println!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitestore_core::{scan_segment_files, Config, SnapshotStore};
    use std::time::Duration;

    #[test]
    fn summarize_reports_chunks_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                SnapshotStore::open_with_config(dir.path(), Config::default().sync_on_flush(false))
                    .unwrap();
            for p in ["a", "b", "c"] {
                store.append(p.as_bytes().to_vec()).unwrap();
            }
            assert!(store.flush_pending(Duration::from_secs(5)));
            store.delete(kitestore_core::ChunkId::new(1)).unwrap();
            store.destroy().unwrap();
        }

        let files = scan_segment_files(dir.path()).unwrap();
        let summary = summarize(&files[0]);
        assert_eq!(summary.file, "segment-0.data");
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.last_id, Some(2));
        assert!(!summary.torn);
        assert!(summary.error.is_none());
    }
}
