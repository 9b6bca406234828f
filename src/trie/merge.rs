//! Merging two snapshots' tries
//!
//! Merging is slot by slot. Identical slots (by hash) are taken as they are,
//! an empty slot takes the other side, two subtrees merge recursively, an item
//! meeting a subtree is inserted into it, and two items either resolve as an
//! edit conflict (same path) or split into a deeper node (different paths).
//!
//! Edit conflicts are last-write-wins on `mod_time`. On an exact tie the
//! second (remote) side wins. Every result is a pure function of the two
//! input hashes, so a merge can be retried and checked cheaply.

use super::node::KEY_LEN;
use super::{PathTrie, TrieEntry, TrieNode};
use crate::model::{Hash, ItemInfo, Snapshot};
use crate::store::ContentStore;
use crate::{Error, Result};
use tracing::debug;

/// Which side of the merge an item came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Combines two tries, writing new nodes only where the result differs
/// from what already exists
pub struct MergeEngine<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        MergeEngine { store }
    }

    /// Merge a local and a remote snapshot
    ///
    /// The result keeps the local snapshot's identity with a merged root. When
    /// the merged trie is exactly the remote one, the remote root hash is
    /// adopted without saving anything.
    pub fn merge_snapshots(&self, local: Snapshot, remote: Snapshot) -> Result<Snapshot> {
        if local.root == remote.root {
            return Ok(local);
        }

        let local_trie = PathTrie::load(self.store, &local.root)?;
        let remote_trie = PathTrie::load(self.store, &remote.root)?;
        let merged = self.merge_tries(&local_trie, &remote_trie)?;

        let mut result = local;
        if merged.hash() == remote.root {
            debug!(root = %remote.root.short(), "remote snapshot already contains local changes");
            result.root = remote.root;
        } else {
            result.root = merged.save(self.store)?;
            debug!(root = %result.root.short(), "saved merged snapshot root");
        }
        Ok(result)
    }

    /// Merge two tries; `local` is the first side, `remote` the second
    pub fn merge_tries(&self, local: &PathTrie, remote: &PathTrie) -> Result<PathTrie> {
        let root = self.merge_nodes(local.root(), remote.root())?;
        Ok(PathTrie::from_root(root))
    }

    /// Merge two nodes at the same depth into a new, unsaved node
    pub fn merge_nodes(&self, local: &TrieNode, remote: &TrieNode) -> Result<TrieNode> {
        if local.depth() != remote.depth() {
            return Err(Error::Corruption(format!(
                "merging nodes at depths {} and {}",
                local.depth(),
                remote.depth()
            )));
        }

        let mut merged = TrieNode::new(local.depth());
        for slot in 0..=u8::MAX {
            let ent0 = local.entry(slot);
            let ent1 = remote.entry(slot);

            let entry = if ent0 == ent1 {
                ent0
            } else {
                match (ent0, ent1) {
                    (TrieEntry::None, _) => ent1,
                    (_, TrieEntry::None) => ent0,
                    (TrieEntry::More(h0), TrieEntry::More(h1)) => {
                        let child0 = local.load_child(self.store, &h0)?;
                        let child1 = remote.load_child(self.store, &h1)?;
                        let child = self.merge_nodes(&child0, &child1)?;

                        // Keep the remote hash unless the merge really changed it
                        if child.hash() == h1 {
                            TrieEntry::More(h1)
                        } else {
                            TrieEntry::More(child.save(self.store)?)
                        }
                    }
                    (TrieEntry::More(_), TrieEntry::Item(_)) => {
                        self.merge_insert(local, ent0, ent1, Side::Remote)?
                    }
                    (TrieEntry::Item(_), TrieEntry::More(_)) => {
                        self.merge_insert(remote, ent1, ent0, Side::Local)?
                    }
                    (TrieEntry::Item(_), TrieEntry::Item(_)) => {
                        self.merge_items(&merged, ent0, ent1)?
                    }
                }
            };
            merged.set(slot, entry);
        }
        Ok(merged)
    }

    /// Insert `item` into the subtree behind `more`, returning the new `More`
    ///
    /// `parent` is the node owning the `More` slot. A `More(Hash::ZERO)`
    /// starts from an empty child. A same-path clash inside the subtree is
    /// resolved like [`merge_items`](Self::merge_items), with `item_side`
    /// telling which side the inserted item came from.
    fn merge_insert(
        &self,
        parent: &TrieNode,
        more: TrieEntry,
        item: TrieEntry,
        item_side: Side,
    ) -> Result<TrieEntry> {
        let TrieEntry::More(child_hash) = more else {
            return Err(Error::InvalidArgument(format!(
                "merge-insert target must be More, got {}",
                more.type_name()
            )));
        };

        let mut child = parent.load_child(self.store, &child_hash)?;
        self.insert_item(&mut child, item, item_side)?;

        // The subtree may already hold this exact item
        if !child_hash.is_zero() && child.hash() == child_hash {
            return Ok(more);
        }
        Ok(TrieEntry::More(child.save(self.store)?))
    }

    /// Resolve two items that landed in the same slot
    ///
    /// Same path: the strictly newer `mod_time` wins, a tie goes to `ent1`.
    /// Different paths: both move into a fresh child node, `ent0` first.
    fn merge_items(&self, parent: &TrieNode, ent0: TrieEntry, ent1: TrieEntry) -> Result<TrieEntry> {
        let (TrieEntry::Item(h0), TrieEntry::Item(h1)) = (ent0, ent1) else {
            return Err(Error::InvalidArgument(format!(
                "merge-items needs two Items, got {} and {}",
                ent0.type_name(),
                ent1.type_name()
            )));
        };

        let info0 = ItemInfo::load(self.store, &h0)?;
        let info1 = ItemInfo::load(self.store, &h1)?;
        if info0.key() == info1.key() {
            return Ok(pick_newer(&info0, ent0, &info1, ent1));
        }

        let mut child = parent.load_child(self.store, &Hash::ZERO)?;
        self.insert_item(&mut child, ent0, Side::Local)?;
        self.insert_item(&mut child, ent1, Side::Remote)?;
        Ok(TrieEntry::More(child.save(self.store)?))
    }

    fn insert_item(&self, node: &mut TrieNode, item: TrieEntry, side: Side) -> Result<()> {
        let key: [u8; KEY_LEN] = TrieNode::key_of(self.store, &item)?;
        let store = self.store;
        node.insert_with(store, &key, item, &|existing: TrieEntry, incoming: TrieEntry| {
            let (local, remote) = match side {
                Side::Local => (incoming, existing),
                Side::Remote => (existing, incoming),
            };
            let local_info = ItemInfo::load(store, &local.hash())?;
            let remote_info = ItemInfo::load(store, &remote.hash())?;
            Ok(pick_newer(&local_info, local, &remote_info, remote))
        })
    }
}

/// Last-write-wins between two versions of one path; ties go to the second
fn pick_newer(info0: &ItemInfo, ent0: TrieEntry, info1: &ItemInfo, ent1: TrieEntry) -> TrieEntry {
    let winner = if info0.mod_time > info1.mod_time {
        ent0
    } else {
        ent1
    };
    debug!(
        path = %info0.path,
        first = info0.mod_time,
        second = info1.mod_time,
        took_second = winner == ent1,
        "resolved edit conflict"
    );
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemKind;
    use crate::store::MemoryStore;
    use crate::trie::path_key;

    fn trie(store: &MemoryStore, items: &[(&str, u64)]) -> PathTrie {
        let mut trie = PathTrie::new();
        for (path, mod_time) in items {
            let mut info = ItemInfo::new(*path, ItemKind::File, *mod_time);
            info.content_hash = Hash::digest(format!("{}@{}", path, mod_time).as_bytes());
            trie.put(store, &info).unwrap();
        }
        trie
    }

    fn paths_sharing_first_byte(n: usize) -> Vec<String> {
        let byte = path_key("/group-0")[0];
        (0..)
            .map(|i| format!("/group-{}", i))
            .filter(|p| path_key(p)[0] == byte)
            .take(n)
            .collect()
    }

    #[test]
    fn test_merge_disjoint() {
        let store = MemoryStore::new();
        let local = trie(&store, &[("/a.txt", 1)]);
        let remote = trie(&store, &[("/b.txt", 2)]);

        let merged = local.merge(&store, &remote).unwrap();
        let paths: Vec<_> = merged
            .items(&store)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths, vec!["/a.txt", "/b.txt"]);
    }

    #[test]
    fn test_newer_wins_either_side() {
        let store = MemoryStore::new();
        let old = trie(&store, &[("/n.txt", 100)]);
        let new = trie(&store, &[("/n.txt", 200)]);

        for (l, r) in [(&old, &new), (&new, &old)] {
            let merged = l.merge(&store, r).unwrap();
            assert_eq!(merged.get(&store, "/n.txt").unwrap().unwrap().mod_time, 200);
        }
    }

    #[test]
    fn test_tie_goes_to_second() {
        let store = MemoryStore::new();
        let mut a = ItemInfo::new("/t.txt", ItemKind::File, 7);
        a.content_hash = Hash::digest(b"local");
        let mut b = a.clone();
        b.content_hash = Hash::digest(b"remote");

        let mut local = PathTrie::new();
        local.put(&store, &a).unwrap();
        let mut remote = PathTrie::new();
        remote.put(&store, &b).unwrap();

        let merged = local.merge(&store, &remote).unwrap();
        assert_eq!(merged.get(&store, "/t.txt").unwrap().unwrap(), b);
        let merged = remote.merge(&store, &local).unwrap();
        assert_eq!(merged.get(&store, "/t.txt").unwrap().unwrap(), a);
    }

    #[test]
    fn test_item_meets_subtree() {
        let store = MemoryStore::new();
        let group = paths_sharing_first_byte(3);

        // Local holds two colliding paths (a subtree), remote one more item
        let local = trie(&store, &[(&group[0], 1), (&group[1], 1)]);
        let remote = trie(&store, &[(&group[2], 1)]);

        for merged in [
            local.merge(&store, &remote).unwrap(),
            remote.merge(&store, &local).unwrap(),
        ] {
            for p in &group {
                assert!(merged.get(&store, p).unwrap().is_some(), "missing {}", p);
            }
        }
    }

    #[test]
    fn test_item_meets_subtree_conflict_respects_mod_time() {
        let store = MemoryStore::new();
        let group = paths_sharing_first_byte(2);

        // Remote's copy of group[0] is newer but lives inside a subtree
        let local = trie(&store, &[(&group[0], 100)]);
        let remote = trie(&store, &[(&group[0], 300), (&group[1], 1)]);

        let merged = local.merge(&store, &remote).unwrap();
        assert_eq!(merged.get(&store, &group[0]).unwrap().unwrap().mod_time, 300);

        let merged = remote.merge(&store, &local).unwrap();
        assert_eq!(merged.get(&store, &group[0]).unwrap().unwrap().mod_time, 300);
    }

    #[test]
    fn test_merge_matches_direct_build() {
        let store = MemoryStore::new();
        let group = paths_sharing_first_byte(4);
        let local = trie(&store, &[(&group[0], 1), (&group[2], 1), ("/x", 1)]);
        let remote = trie(&store, &[(&group[1], 1), (&group[3], 1), ("/y", 1)]);
        let all = trie(
            &store,
            &[
                (&group[0], 1),
                (&group[1], 1),
                (&group[2], 1),
                (&group[3], 1),
                ("/x", 1),
                ("/y", 1),
            ],
        );

        assert_eq!(local.merge(&store, &remote).unwrap().hash(), all.hash());
        assert_eq!(remote.merge(&store, &local).unwrap().hash(), all.hash());
    }

    #[test]
    fn test_merge_items_rejects_non_items() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(&store);
        let parent = TrieNode::new(0);

        let err = engine
            .merge_items(&parent, TrieEntry::More(Hash::ZERO), TrieEntry::None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = engine
            .merge_insert(&parent, TrieEntry::Item(Hash::ZERO), TrieEntry::None, Side::Local)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_depth_mismatch_is_corruption() {
        let store = MemoryStore::new();
        let engine = MergeEngine::new(&store);
        let err = engine
            .merge_nodes(&TrieNode::new(0), &TrieNode::new(1))
            .unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_snapshot_same_root_is_noop() {
        let store = MemoryStore::new();
        let root = trie(&store, &[("/a", 1)]).save(&store).unwrap();
        let before = store.len();

        let snap = Snapshot::new(0, root);
        let merged = MergeEngine::new(&store).merge_snapshots(snap, snap).unwrap();
        assert_eq!(merged, snap);
        assert_eq!(store.len(), before);
    }

    #[test]
    fn test_snapshot_fast_forward_adopts_remote_root() {
        let store = MemoryStore::new();
        let local_root = trie(&store, &[("/a", 1)]).save(&store).unwrap();
        let remote_root = trie(&store, &[("/a", 1), ("/b", 1)]).save(&store).unwrap();

        let merged = MergeEngine::new(&store)
            .merge_snapshots(Snapshot::new(0, local_root), Snapshot::new(0, remote_root))
            .unwrap();
        assert_eq!(merged, Snapshot::new(0, remote_root));

        let from_empty = MergeEngine::new(&store)
            .merge_snapshots(Snapshot::empty(), Snapshot::new(0, remote_root))
            .unwrap();
        assert_eq!(from_empty.root, remote_root);
    }
}
