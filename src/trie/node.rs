//! Trie node: 256 slots at one depth, with its canonical encoding
//!
//! Encoding (the bytes whose blob hash addresses the node):
//! ```text
//! depth: 4 bytes (u32 LE)
//! 256 × slot:
//!   - tag: 1 byte (0 = None, 1 = Item, 2 = More)
//!   - hash: 32 bytes, only for Item and More
//! ```

use super::{path_key, TrieEntry};
use crate::model::{Hash, ItemInfo};
use crate::store::{Blob, BlobType, ContentStore};
use crate::{Error, Result};

/// Slots per node
pub const FANOUT: usize = 256;

/// Key length in bytes; also the depth bound of the trie
pub const KEY_LEN: usize = 32;

/// Decides the entry to keep when an insert meets an item with the same key.
/// Called as `(existing, incoming)`.
pub(crate) type SameKey<'a> = &'a dyn Fn(TrieEntry, TrieEntry) -> Result<TrieEntry>;

/// One level of the path trie
#[derive(Clone, PartialEq, Eq)]
pub struct TrieNode {
    depth: u32,
    table: Box<[TrieEntry; FANOUT]>,
}

impl TrieNode {
    /// An empty node at the given depth
    pub fn new(depth: u32) -> Self {
        TrieNode {
            depth,
            table: Box::new([TrieEntry::None; FANOUT]),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn entry(&self, slot: u8) -> TrieEntry {
        self.table[slot as usize]
    }

    pub fn set(&mut self, slot: u8, entry: TrieEntry) {
        self.table[slot as usize] = entry;
    }

    /// Occupied slots in slot order
    pub fn entries(&self) -> impl Iterator<Item = (u8, TrieEntry)> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_none())
            .map(|(slot, e)| (slot as u8, *e))
    }

    pub fn is_empty(&self) -> bool {
        self.table.iter().all(TrieEntry::is_none)
    }

    /// Canonical serialization of this node
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + FANOUT * (1 + Hash::LEN));
        out.extend_from_slice(&self.depth.to_le_bytes());
        for entry in self.table.iter() {
            out.push(entry.tag());
            if !entry.is_none() {
                out.extend_from_slice(entry.hash().as_bytes());
            }
        }
        out
    }

    /// Parse a canonical serialization
    pub fn decode(data: &[u8]) -> Result<Self> {
        let corrupt = |msg: &str| Error::Corruption(format!("trie node: {}", msg));

        if data.len() < 4 {
            return Err(corrupt("truncated depth"));
        }
        let depth = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if depth as usize >= KEY_LEN {
            return Err(corrupt(&format!("depth {} out of range", depth)));
        }

        let mut node = TrieNode::new(depth);
        let mut pos = 4;
        for slot in 0..FANOUT {
            let tag = *data.get(pos).ok_or_else(|| corrupt("truncated table"))?;
            pos += 1;
            if tag == TrieEntry::TAG_NONE {
                continue;
            }

            let hash = data
                .get(pos..pos + Hash::LEN)
                .and_then(Hash::from_slice)
                .ok_or_else(|| corrupt("truncated hash"))?;
            pos += Hash::LEN;

            node.table[slot] = match tag {
                TrieEntry::TAG_ITEM => TrieEntry::Item(hash),
                TrieEntry::TAG_MORE => TrieEntry::More(hash),
                other => return Err(corrupt(&format!("unknown slot tag {}", other))),
            };
        }

        if pos != data.len() {
            return Err(corrupt("trailing bytes"));
        }
        Ok(node)
    }

    fn to_blob(&self) -> Blob {
        Blob::new(BlobType::Node, self.encode())
    }

    /// Content hash of this node, without storing it
    pub fn hash(&self) -> Hash {
        self.to_blob().hash()
    }

    /// Two nodes are equal exactly when their hashes are
    pub fn equals(&self, other: &TrieNode) -> bool {
        self.hash() == other.hash()
    }

    /// Persist this node and return its hash
    pub fn save(&self, store: &dyn ContentStore) -> Result<Hash> {
        store.put(&self.to_blob())
    }

    /// Load a node by hash
    pub fn load(store: &dyn ContentStore, hash: &Hash) -> Result<Self> {
        let blob = store
            .get_typed(hash, BlobType::Node)
            .map_err(|e| e.context(format!("trie node {}", hash.short())))?;
        Self::decode(&blob.data).map_err(|e| e.context(hash.short()))
    }

    /// Load the child a `More` slot of this node points to
    ///
    /// `Hash::ZERO` yields a fresh empty child.
    pub fn load_child(&self, store: &dyn ContentStore, hash: &Hash) -> Result<TrieNode> {
        let child_depth = self.depth + 1;
        if hash.is_zero() {
            return Ok(TrieNode::new(child_depth));
        }

        let child = Self::load(store, hash)?;
        if child.depth != child_depth {
            return Err(Error::Corruption(format!(
                "trie node {} at depth {}, expected {}",
                hash.short(),
                child.depth,
                child_depth
            )));
        }
        Ok(child)
    }

    fn slot_for(&self, key: &[u8; KEY_LEN]) -> Result<usize> {
        let depth = self.depth as usize;
        if depth >= KEY_LEN {
            return Err(Error::Corruption(
                "trie deeper than key length (path key collision)".into(),
            ));
        }
        Ok(key[depth] as usize)
    }

    /// Insert an item, replacing any item with the same key
    pub fn insert(
        &mut self,
        store: &dyn ContentStore,
        key: &[u8; KEY_LEN],
        entry: TrieEntry,
    ) -> Result<()> {
        self.insert_with(store, key, entry, &|_: TrieEntry, incoming: TrieEntry| Ok(incoming))
    }

    /// Insert an item, asking `on_same_key` which entry survives a same-key clash
    ///
    /// Colliding distinct keys split the slot into a child node one level
    /// deeper, as many levels as it takes to tell them apart.
    pub(crate) fn insert_with(
        &mut self,
        store: &dyn ContentStore,
        key: &[u8; KEY_LEN],
        entry: TrieEntry,
        on_same_key: SameKey<'_>,
    ) -> Result<()> {
        if !entry.is_item() {
            return Err(Error::InvalidArgument(format!(
                "can only insert Item entries, got {}",
                entry.type_name()
            )));
        }

        let slot = self.slot_for(key)?;
        match self.table[slot] {
            TrieEntry::None => {
                self.table[slot] = entry;
            }
            existing @ TrieEntry::Item(existing_hash) => {
                if existing == entry {
                    return Ok(());
                }

                let existing_key = ItemInfo::load(store, &existing_hash)?.key();
                if existing_key == *key {
                    self.table[slot] = on_same_key(existing, entry)?;
                } else {
                    let mut child = TrieNode::new(self.depth + 1);
                    child.insert_with(store, &existing_key, existing, on_same_key)?;
                    child.insert_with(store, key, entry, on_same_key)?;
                    self.table[slot] = TrieEntry::More(child.save(store)?);
                }
            }
            TrieEntry::More(child_hash) => {
                let mut child = self.load_child(store, &child_hash)?;
                child.insert_with(store, key, entry, on_same_key)?;
                // An unchanged child is already stored under `child_hash`
                if child.hash() != child_hash {
                    self.table[slot] = TrieEntry::More(child.save(store)?);
                }
            }
        }
        Ok(())
    }

    /// Find the item stored under `key`
    pub fn find(
        &self,
        store: &dyn ContentStore,
        key: &[u8; KEY_LEN],
    ) -> Result<Option<(Hash, ItemInfo)>> {
        let slot = self.slot_for(key)?;
        match self.table[slot] {
            TrieEntry::None => Ok(None),
            TrieEntry::Item(hash) => {
                let info = ItemInfo::load(store, &hash)?;
                if info.key() == *key {
                    Ok(Some((hash, info)))
                } else {
                    Ok(None)
                }
            }
            TrieEntry::More(child_hash) => {
                let child = self.load_child(store, &child_hash)?;
                child.find(store, key)
            }
        }
    }

    /// Remove the item under `key`, returning its info hash
    ///
    /// A child left with nothing becomes `None`; a child left with a single
    /// item folds back into this slot. The trie shape then depends only on
    /// the set of keys it holds.
    pub fn remove(&mut self, store: &dyn ContentStore, key: &[u8; KEY_LEN]) -> Result<Option<Hash>> {
        let slot = self.slot_for(key)?;
        match self.table[slot] {
            TrieEntry::None => Ok(None),
            TrieEntry::Item(hash) => {
                if ItemInfo::load(store, &hash)?.key() != *key {
                    return Ok(None);
                }
                self.table[slot] = TrieEntry::None;
                Ok(Some(hash))
            }
            TrieEntry::More(child_hash) => {
                let mut child = self.load_child(store, &child_hash)?;
                let removed = child.remove(store, key)?;
                if removed.is_none() {
                    return Ok(None);
                }

                let mut occupied = child.entries();
                self.table[slot] = match (occupied.next(), occupied.next()) {
                    (None, _) => TrieEntry::None,
                    (Some((_, item @ TrieEntry::Item(_))), None) => item,
                    _ => TrieEntry::More(child.save(store)?),
                };
                Ok(removed)
            }
        }
    }

    /// Append the hash of every item below this node
    pub fn collect_items(&self, store: &dyn ContentStore, out: &mut Vec<Hash>) -> Result<()> {
        for (_, entry) in self.entries() {
            match entry {
                TrieEntry::Item(hash) => out.push(hash),
                TrieEntry::More(child_hash) => {
                    self.load_child(store, &child_hash)?
                        .collect_items(store, out)?;
                }
                TrieEntry::None => {}
            }
        }
        Ok(())
    }

    /// Key of the item an `Item` entry refers to
    pub(crate) fn key_of(store: &dyn ContentStore, entry: &TrieEntry) -> Result<[u8; KEY_LEN]> {
        match entry {
            TrieEntry::Item(hash) => Ok(path_key(&ItemInfo::load(store, hash)?.path)),
            other => Err(Error::InvalidArgument(format!(
                "key of {} entry requested",
                other.type_name()
            ))),
        }
    }
}

impl std::fmt::Debug for TrieNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieNode")
            .field("depth", &self.depth)
            .field("entries", &self.entries().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemKind;
    use crate::store::MemoryStore;

    fn item(store: &MemoryStore, path: &str) -> (TrieEntry, [u8; KEY_LEN]) {
        let info = ItemInfo::new(path, ItemKind::File, 1);
        let hash = info.save(store).unwrap();
        (TrieEntry::Item(hash), info.key())
    }

    /// Two paths whose keys agree on the first byte
    fn colliding_pair() -> (String, String) {
        let first = "/collide-0".to_string();
        let byte = path_key(&first)[0];
        let second = (1..)
            .map(|i| format!("/collide-{}", i))
            .find(|p| path_key(p)[0] == byte)
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_encode_layout() {
        let mut node = TrieNode::new(3);
        let h = Hash::digest(b"x");
        node.set(0, TrieEntry::Item(h));
        node.set(255, TrieEntry::More(h));

        let bytes = node.encode();
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[5..37], h.as_bytes());
        // 254 empty slots, then the More slot
        assert!(bytes[37..37 + 254].iter().all(|b| *b == 0));
        assert_eq!(bytes[37 + 254], 2);
        assert_eq!(bytes.len(), 4 + 256 + 2 * 32);
    }

    #[test]
    fn test_decode_roundtrip_and_rejects() {
        let mut node = TrieNode::new(1);
        node.set(9, TrieEntry::Item(Hash::digest(b"a")));
        let bytes = node.encode();
        assert_eq!(TrieNode::decode(&bytes).unwrap(), node);

        assert!(TrieNode::decode(&bytes[..bytes.len() - 1]).is_err());
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(TrieNode::decode(&trailing).is_err());
        let mut bad_tag = TrieNode::new(0).encode();
        bad_tag[4] = 7;
        assert!(TrieNode::decode(&bad_tag).is_err());
        let mut too_deep = TrieNode::new(0).encode();
        too_deep[0] = 32;
        assert!(TrieNode::decode(&too_deep).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = MemoryStore::new();
        let mut node = TrieNode::new(0);
        node.set(1, TrieEntry::Item(Hash::digest(b"i")));
        node.set(2, TrieEntry::More(Hash::digest(b"m")));

        let hash = node.save(&store).unwrap();
        assert_eq!(hash, node.hash());
        let loaded = TrieNode::load(&store, &hash).unwrap();
        assert_eq!(loaded, node);
        assert!(loaded.equals(&node));
    }

    #[test]
    fn test_insert_find() {
        let store = MemoryStore::new();
        let mut root = TrieNode::new(0);
        let (a, ka) = item(&store, "/a.txt");
        let (b, kb) = item(&store, "/b.txt");

        root.insert(&store, &ka, a).unwrap();
        root.insert(&store, &kb, b).unwrap();

        assert_eq!(root.find(&store, &ka).unwrap().unwrap().0, a.hash());
        assert_eq!(root.find(&store, &kb).unwrap().unwrap().0, b.hash());
        assert!(root.find(&store, &path_key("/c.txt")).unwrap().is_none());
    }

    #[test]
    fn test_insert_same_key_replaces() {
        let store = MemoryStore::new();
        let mut root = TrieNode::new(0);
        let old = ItemInfo::new("/n.txt", ItemKind::File, 500);
        let new = ItemInfo::new("/n.txt", ItemKind::File, 100);
        let (ho, hn) = (old.save(&store).unwrap(), new.save(&store).unwrap());

        root.insert(&store, &old.key(), TrieEntry::Item(ho)).unwrap();
        root.insert(&store, &new.key(), TrieEntry::Item(hn)).unwrap();

        // Local writes are authoritative, even with an older stamp
        assert_eq!(root.find(&store, &old.key()).unwrap().unwrap().0, hn);
        assert_eq!(root.entries().count(), 1);
    }

    #[test]
    fn test_insert_collision_splits() {
        let store = MemoryStore::new();
        let (p1, p2) = colliding_pair();
        let (e1, k1) = item(&store, &p1);
        let (e2, k2) = item(&store, &p2);

        let mut root = TrieNode::new(0);
        root.insert(&store, &k1, e1).unwrap();
        root.insert(&store, &k2, e2).unwrap();

        let slot = root.entry(k1[0]);
        assert!(slot.is_more());
        let child = root.load_child(&store, &slot.hash()).unwrap();
        assert_eq!(child.depth(), 1);

        assert_eq!(root.find(&store, &k1).unwrap().unwrap().1.path, p1);
        assert_eq!(root.find(&store, &k2).unwrap().unwrap().1.path, p2);
    }

    #[test]
    fn test_insert_rejects_more() {
        let store = MemoryStore::new();
        let mut root = TrieNode::new(0);
        let err = root
            .insert(&store, &path_key("/x"), TrieEntry::More(Hash::ZERO))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_remove_collapses_to_canonical_shape() {
        let store = MemoryStore::new();
        let (p1, p2) = colliding_pair();
        let (e1, k1) = item(&store, &p1);
        let (e2, k2) = item(&store, &p2);

        let mut only_first = TrieNode::new(0);
        only_first.insert(&store, &k1, e1).unwrap();

        let mut both = TrieNode::new(0);
        both.insert(&store, &k1, e1).unwrap();
        both.insert(&store, &k2, e2).unwrap();
        assert_eq!(both.remove(&store, &k2).unwrap(), Some(e2.hash()));

        assert_eq!(both.hash(), only_first.hash());
        assert_eq!(both.remove(&store, &k2).unwrap(), None);
    }

    #[test]
    fn test_load_child_depth_checked() {
        let store = MemoryStore::new();
        let wrong = TrieNode::new(5).save(&store).unwrap();
        let root = TrieNode::new(0);

        assert!(matches!(
            root.load_child(&store, &wrong),
            Err(Error::Corruption(_))
        ));
        assert_eq!(root.load_child(&store, &Hash::ZERO).unwrap().depth(), 1);
    }

    #[test]
    fn test_collect_items() {
        let store = MemoryStore::new();
        let (p1, p2) = colliding_pair();
        let mut root = TrieNode::new(0);
        let mut expected = Vec::new();
        for path in [p1.as_str(), p2.as_str(), "/solo"] {
            let (e, k) = item(&store, path);
            root.insert(&store, &k, e).unwrap();
            expected.push(e.hash());
        }

        let mut found = Vec::new();
        root.collect_items(&store, &mut found).unwrap();
        found.sort();
        expected.sort();
        assert_eq!(found, expected);
    }
}
