//! Content-addressed object store
//!
//! Blobs are stored by their BLAKE3 hash and compressed with zstd. The
//! [`ContentStore`] trait is the seam the trie and merge code work against.

mod archive;
mod blob;
mod content;
mod file_store;

pub use archive::Archive;
pub use blob::{Blob, BlobType};
pub use content::{ContentStore, MemoryStore};
pub use file_store::{Block, ObjectStore, BLOCK_SIZE};
