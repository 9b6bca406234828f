//! Path trie handle: a root node plus path-level helpers

use super::{path_key, MergeEngine, TrieEntry, TrieNode};
use crate::model::{Hash, ItemInfo};
use crate::store::ContentStore;
use crate::Result;

/// In-memory handle on a trie, used for traversal and mutation before the
/// root is (re-)persisted
///
/// The empty trie is addressed by `Hash::ZERO` and never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTrie {
    root: TrieNode,
}

impl PathTrie {
    /// A new empty trie
    pub fn new() -> Self {
        PathTrie {
            root: TrieNode::new(0),
        }
    }

    /// Wrap an existing root node
    pub fn from_root(root: TrieNode) -> Self {
        PathTrie { root }
    }

    /// Load a trie from a root hash
    pub fn load(store: &dyn ContentStore, root_hash: &Hash) -> Result<Self> {
        if root_hash.is_zero() {
            return Ok(Self::new());
        }
        let root = TrieNode::load(store, root_hash)?;
        if root.depth() != 0 {
            return Err(crate::Error::Corruption(format!(
                "root node {} has depth {}",
                root_hash.short(),
                root.depth()
            )));
        }
        Ok(PathTrie { root })
    }

    pub fn root(&self) -> &TrieNode {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Root hash, without storing anything
    pub fn hash(&self) -> Hash {
        if self.root.is_empty() {
            Hash::ZERO
        } else {
            self.root.hash()
        }
    }

    /// Hash equality of the two roots
    pub fn equals(&self, other: &PathTrie) -> bool {
        self.hash() == other.hash()
    }

    /// Persist the root node and return the root hash
    pub fn save(&self, store: &dyn ContentStore) -> Result<Hash> {
        if self.root.is_empty() {
            return Ok(Hash::ZERO);
        }
        self.root.save(store)
    }

    /// Look up a path, returning its info hash and info
    pub fn lookup(&self, store: &dyn ContentStore, path: &str) -> Result<Option<(Hash, ItemInfo)>> {
        self.root.find(store, &path_key(path))
    }

    /// Look up a path's item info
    pub fn get(&self, store: &dyn ContentStore, path: &str) -> Result<Option<ItemInfo>> {
        Ok(self.lookup(store, path)?.map(|(_, info)| info))
    }

    /// Save `info` and place it in the trie, replacing the same path
    pub fn put(&mut self, store: &dyn ContentStore, info: &ItemInfo) -> Result<Hash> {
        let hash = info.save(store)?;
        self.root.insert(store, &info.key(), TrieEntry::Item(hash))?;
        Ok(hash)
    }

    /// Remove a path, returning the removed info hash
    pub fn remove(&mut self, store: &dyn ContentStore, path: &str) -> Result<Option<Hash>> {
        self.root.remove(store, &path_key(path))
    }

    /// Every item in the trie, sorted by path
    pub fn items(&self, store: &dyn ContentStore) -> Result<Vec<ItemInfo>> {
        let mut hashes = Vec::new();
        self.root.collect_items(store, &mut hashes)?;

        let mut items = hashes
            .iter()
            .map(|h| ItemInfo::load(store, h))
            .collect::<Result<Vec<_>>>()?;
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }

    /// Merge `other` into a new trie; `self` is the local side
    pub fn merge(&self, store: &dyn ContentStore, other: &PathTrie) -> Result<PathTrie> {
        MergeEngine::new(store).merge_tries(self, other)
    }
}

impl Default for PathTrie {
    fn default() -> Self {
        Self::new()
    }
}
