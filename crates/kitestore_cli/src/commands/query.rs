//! Query command implementation.

use super::{open_store, print_chunk, CliError, CliResult};
use kitestore_core::ChunkId;
use std::io::Write;
use std::path::Path;

/// Looks up one chunk, optionally soft-deleting it.
pub fn run(path: &Path, id: i64, raw: bool, delete: bool) -> CliResult<()> {
    let id = ChunkId::new(id);
    let store = open_store(path)?;

    let Some(chunk) = store.query(id)? else {
        store.destroy()?;
        return Err(CliError::ChunkNotFound(id).into());
    };

    if raw {
        std::io::stdout().write_all(&chunk.payload)?;
    } else {
        print_chunk(&chunk, 256);
    }

    if delete && !chunk.is_deleted() {
        store.delete(id)?;
        if !raw {
            println!("Marked {id} deleted");
        }
    }

    Ok(store.destroy()?)
}
