//! Content-addressed hash trie over file paths
//!
//! - Every path maps to a 32-byte key (BLAKE3 of the path)
//! - Each node has 256 slots; a node at depth `d` picks its slot with key byte `d`
//! - Nodes are immutable once saved and addressed by the hash of their encoding
//! - Two snapshots' tries merge slot by slot, reusing unchanged subtrees by hash

mod entry;
mod merge;
mod node;
mod path_trie;

pub use entry::TrieEntry;
pub use merge::MergeEngine;
pub use node::{TrieNode, FANOUT, KEY_LEN};
pub use path_trie::PathTrie;

use crate::model::{normalize_path, Hash};

/// The trie key of a share-relative path
///
/// Insert, lookup and merge must all derive keys through this function.
pub fn path_key(path: &str) -> [u8; KEY_LEN] {
    *Hash::digest(normalize_path(path).as_bytes()).as_bytes()
}
