//! # sharesync
//!
//! Directory synchronization over content-addressed, mergeable snapshots.
//!
//! Each state of a synced directory is a snapshot: the root of a 256-way
//! hash trie keyed by the BLAKE3 hash of each path. Trie nodes and per-file
//! metadata are immutable blobs addressed by their own hash, so two machines
//! that edited the same share independently can merge their snapshots slot by
//! slot, reusing every subtree the two sides share.
//!
//! ## Core Concepts
//!
//! - **Items**: per-path metadata (`ItemInfo`), stored as blobs
//! - **Trie**: `TrieNode`s with `None` / `Item` / `More` slots
//! - **Snapshots**: a trie root plus its slot id, committed as a list
//! - **Merge**: deterministic, last-write-wins on modification time
//! - **Shares**: a directory, its engine (`Eft`), and an upload loop
//!
//! ## Example
//!
//! ```ignore
//! use sharesync::{Eft, ItemInfo, ItemKind};
//!
//! let eft = Eft::open(".sharesync")?;
//! eft.put(ItemInfo::new("/notes.txt", ItemKind::File, mtime), "notes.txt".as_ref())?;
//! eft.merge_remote(&remote_list_hash)?;
//! ```

pub mod cloud;
pub mod eft;
pub mod model;
pub mod settings;
pub mod share;
pub mod store;
pub mod trie;
pub mod upload;

mod error;

#[cfg(feature = "sync")]
pub use cloud::HttpCloud;
pub use cloud::{CloudStore, CloudTransport, MemoryCloud, RemoteShare};
pub use eft::{Checkpoint, Eft, Transaction};
pub use error::{Error, Result};
pub use model::{Hash, ItemInfo, ItemKind, Snapshot, SnapshotList};
pub use settings::Settings;
pub use share::{Share, ShareConfig};
pub use store::{ContentStore, MemoryStore, ObjectStore};
pub use trie::{MergeEngine, PathTrie, TrieEntry, TrieNode};
pub use upload::{upload_once, UploadReport, UploadSignal, UploadTrigger, Uploader};

/// Store format version
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"SHARESYN";
