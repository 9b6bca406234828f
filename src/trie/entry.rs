//! Trie slot entries

use crate::model::Hash;

/// One of the 256 slots of a [`TrieNode`](super::TrieNode)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrieEntry {
    /// Empty slot
    #[default]
    None,
    /// Leaf: hash of an item info blob
    Item(Hash),
    /// Pointer to a child node one level deeper
    ///
    /// `More(Hash::ZERO)` stands for a child that has not been created yet.
    More(Hash),
}

impl TrieEntry {
    pub(crate) const TAG_NONE: u8 = 0;
    pub(crate) const TAG_ITEM: u8 = 1;
    pub(crate) const TAG_MORE: u8 = 2;

    /// The referenced hash, `Hash::ZERO` for an empty slot
    pub fn hash(&self) -> Hash {
        match self {
            TrieEntry::None => Hash::ZERO,
            TrieEntry::Item(h) | TrieEntry::More(h) => *h,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TrieEntry::None)
    }

    pub fn is_item(&self) -> bool {
        matches!(self, TrieEntry::Item(_))
    }

    pub fn is_more(&self) -> bool {
        matches!(self, TrieEntry::More(_))
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            TrieEntry::None => Self::TAG_NONE,
            TrieEntry::Item(_) => Self::TAG_ITEM,
            TrieEntry::More(_) => Self::TAG_MORE,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            TrieEntry::None => "None",
            TrieEntry::Item(_) => "Item",
            TrieEntry::More(_) => "More",
        }
    }
}
