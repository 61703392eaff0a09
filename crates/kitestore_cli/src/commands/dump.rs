//! Dump command implementation.

use super::{print_chunk, read_segment, segment_files, CliError, CliResult};
use kitestore_core::{Chunk, ChunkId};
use serde::Serialize;
use std::path::Path;

/// One chunk as printed by `dump --format json`.
#[derive(Debug, Serialize)]
struct DumpedChunk {
    id: i64,
    deleted: bool,
    checksum: String,
    checksum_ok: bool,
    len: usize,
    payload: String,
}

impl From<&Chunk> for DumpedChunk {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id.as_i64(),
            deleted: chunk.is_deleted(),
            checksum: format!("{:08x}", chunk.checksum),
            checksum_ok: chunk.verify().is_ok(),
            len: chunk.payload.len(),
            payload: String::from_utf8_lossy(&chunk.payload).into_owned(),
        }
    }
}

/// Runs the dump command.
///
/// Dumps the segment starting at `start_id`, or every segment when `None`.
pub fn run(
    path: &Path,
    start_id: Option<i64>,
    limit: Option<usize>,
    format: &str,
) -> CliResult<()> {
    let mut files = segment_files(path)?;
    if let Some(start) = start_id {
        let start = ChunkId::new(start);
        files.retain(|f| f.start_id == start);
        if files.is_empty() {
            return Err(CliError::SegmentNotFound(start).into());
        }
    }

    let limit = limit.unwrap_or(usize::MAX);
    let mut dumped = Vec::new();
    let mut printed = 0usize;

    for file in &files {
        if printed >= limit {
            break;
        }
        let parsed = read_segment(file)?;
        let take = parsed.chunks.len().min(limit - printed);

        if format == "json" {
            dumped.extend(parsed.chunks[..take].iter().map(DumpedChunk::from));
        } else {
            println!("{} ({} chunks)", file.path.display(), parsed.chunks.len());
            for chunk in &parsed.chunks[..take] {
                print_chunk(chunk, 48);
            }
            if parsed.torn {
                println!("  (incomplete chunk at offset {})", parsed.valid_len);
            }
        }
        printed += take;
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&dumped)?);
    }
    Ok(())
}
