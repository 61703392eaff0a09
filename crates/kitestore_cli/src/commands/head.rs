//! Head command implementation.

use super::{open_store, print_chunk, CliResult};
use std::path::Path;

/// Prints the oldest segment of a store.
pub fn run(path: &Path, include_deleted: bool) -> CliResult<()> {
    let store = open_store(path)?;
    let (start_id, chunks) = store.head()?;

    if !start_id.is_valid() {
        println!("Store is empty");
        return Ok(store.destroy()?);
    }

    let deleted = chunks.iter().filter(|c| c.is_deleted()).count();
    println!(
        "Head segment starts at {start_id}: {} chunks, {deleted} deleted",
        chunks.len()
    );
    for chunk in chunks.iter().filter(|c| include_deleted || !c.is_deleted()) {
        print_chunk(chunk, 64);
    }

    Ok(store.destroy()?)
}
