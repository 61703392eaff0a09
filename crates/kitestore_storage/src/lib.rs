//! # KiteStore Storage
//!
//! Byte-store backends underneath KiteStore segment files.
//!
//! A backend is an **opaque byte store**: it knows nothing about chunk
//! framing, segment naming or ids. The segment layer in `kitestore_core`
//! owns every byte of interpretation.
//!
//! Backends support appends at the tail plus one in-place primitive,
//! [`StorageBackend::write_at`], which the segment layer uses to flip a
//! chunk's status flag without rewriting the file.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - one OS file per segment
//! - [`InMemoryBackend`] - for tests and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use kitestore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! backend.write_at(offset, b"j").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"jello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
