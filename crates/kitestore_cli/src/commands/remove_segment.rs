//! Remove-segment command implementation.

use super::{open_store, CliError, CliResult};
use kitestore_core::ChunkId;
use std::path::Path;

/// Deletes one sealed segment file through the store.
pub fn run(path: &Path, start_id: i64, dry_run: bool) -> CliResult<()> {
    let start_id = ChunkId::new(start_id);
    let store = open_store(path)?;

    let Some(info) = store.segments().into_iter().find(|s| s.start_id == start_id) else {
        store.destroy()?;
        return Err(CliError::SegmentNotFound(start_id).into());
    };

    if dry_run {
        println!(
            "Would remove segment {start_id} ({} bytes{})",
            info.byte_size,
            if info.is_active { ", active: refused" } else { "" }
        );
        return Ok(store.destroy()?);
    }

    store.remove_segment(start_id)?;
    println!("Removed segment {start_id} ({} bytes)", info.byte_size);
    Ok(store.destroy()?)
}
