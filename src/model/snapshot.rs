//! Snapshot type - one immutable state of a share's tree

use super::Hash;
use serde::{Deserialize, Serialize};

/// A snapshot names the root of one complete trie
///
/// Equality covers the whole snapshot, so two snapshots are the same identity
/// only when both the slot id and the root match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Slot of this snapshot in the share's list
    pub id: u32,
    /// Root trie node hash (`Hash::ZERO` for an empty tree)
    pub root: Hash,
}

impl Snapshot {
    pub fn new(id: u32, root: Hash) -> Self {
        Snapshot { id, root }
    }

    /// The initial, empty snapshot of a fresh share
    pub fn empty() -> Self {
        Snapshot::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_zero()
    }
}

/// The unit committed or rolled back by a transaction
///
/// Only a single live snapshot is supported per share; the list shape is kept
/// so the persisted format does not change once more are allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotList {
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotList {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        SnapshotList { snapshots }
    }

    /// A list holding one empty snapshot
    pub fn initial() -> Self {
        SnapshotList::new(vec![Snapshot::empty()])
    }

    /// The single snapshot, or `Unsupported` when there is not exactly one
    pub fn single(&self) -> crate::Result<Snapshot> {
        match self.snapshots.as_slice() {
            [snap] => Ok(*snap),
            other => Err(crate::Error::Unsupported(format!(
                "expected exactly one snapshot, found {}",
                other.len()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_snapshot() {
        let list = SnapshotList::new(vec![Snapshot::new(0, Hash::digest(b"root"))]);
        assert_eq!(list.single().unwrap().root, Hash::digest(b"root"));
    }

    #[test]
    fn test_multiple_snapshots_unsupported() {
        let list = SnapshotList::new(vec![Snapshot::empty(), Snapshot::new(1, Hash::ZERO)]);
        assert!(list.single().unwrap_err().is_unsupported());
        assert!(SnapshotList::default().single().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_identity_includes_id() {
        let root = Hash::digest(b"r");
        assert_ne!(Snapshot::new(0, root), Snapshot::new(1, root));
        assert_eq!(Snapshot::new(0, root), Snapshot::new(0, root));
    }
}
