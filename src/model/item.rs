//! Per-file metadata stored in the trie

use super::Hash;
use crate::store::{Blob, BlobType, ContentStore};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// What kind of filesystem object an item describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// Regular file; content is the file bytes
    File,
    /// Symbolic link; content is the link target
    Symlink,
}

/// Metadata for one synchronized path
///
/// Persisted as its own content-addressed blob. Trie `Item` entries hold the
/// hash of that blob, never the struct itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    /// Path relative to the share root, always starting with `/`
    pub path: String,
    pub kind: ItemKind,
    /// Modification time in nanoseconds since the unix epoch
    pub mod_time: u64,
    /// Content length in bytes
    pub size: u64,
    /// Unix permission bits (0 where unavailable)
    pub mode: u32,
    /// Hash of the content blob
    pub content_hash: Hash,
}

impl ItemInfo {
    /// Create an item with no content attached yet
    pub fn new(path: impl Into<String>, kind: ItemKind, mod_time: u64) -> Self {
        ItemInfo {
            path: normalize_path(&path.into()),
            kind,
            mod_time,
            size: 0,
            mode: 0,
            content_hash: Hash::ZERO,
        }
    }

    /// Build an item from `lstat` metadata of a file in the share
    ///
    /// Directories and special files have no item representation.
    pub fn from_metadata(rel_path: &str, meta: &Metadata) -> crate::Result<Self> {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            ItemKind::Symlink
        } else if file_type.is_file() {
            ItemKind::File
        } else {
            return Err(crate::Error::InvalidArgument(format!(
                "{} is neither a regular file nor a symlink",
                rel_path
            )));
        };

        let mut info = ItemInfo::new(rel_path, kind, mod_time_nanos(meta));
        info.size = meta.len();
        info.mode = file_mode(meta);
        Ok(info)
    }

    /// The trie key for this item
    pub fn key(&self) -> [u8; 32] {
        crate::trie::path_key(&self.path)
    }

    /// Load an item info blob
    pub fn load(store: &dyn ContentStore, hash: &Hash) -> crate::Result<Self> {
        let blob = store
            .get_typed(hash, BlobType::Info)
            .map_err(|e| e.context(format!("item info {}", hash.short())))?;
        Ok(bincode::deserialize(&blob.data)?)
    }

    /// Persist this item info, returning its hash
    pub fn save(&self, store: &dyn ContentStore) -> crate::Result<Hash> {
        let data = bincode::serialize(self)?;
        store.put(&Blob::new(BlobType::Info, data))
    }
}

/// Modification time of a file as nanoseconds since the unix epoch
pub fn mod_time_nanos(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &Metadata) -> u32 {
    0
}

/// Canonical relative path: leading `/`, no trailing `/`, no empty segments
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a.txt"), "/a.txt");
        assert_eq!(normalize_path("/docs//b.txt"), "/docs/b.txt");
        assert_eq!(normalize_path("./x/./y/"), "/x/y");
    }

    #[test]
    fn test_same_path_same_key() {
        let a = ItemInfo::new("notes.txt", ItemKind::File, 1);
        let b = ItemInfo::new("/notes.txt", ItemKind::File, 2);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_save_load() {
        let store = crate::store::MemoryStore::new();
        let mut info = ItemInfo::new("/a.txt", ItemKind::File, 42);
        info.content_hash = Hash::digest(b"content");

        let hash = info.save(&store).unwrap();
        assert_eq!(ItemInfo::load(&store, &hash).unwrap(), info);
        assert!(ItemInfo::load(&store, &Hash::digest(b"x"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_from_metadata_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();

        let meta = std::fs::symlink_metadata(&path).unwrap();
        let info = ItemInfo::from_metadata("/f.txt", &meta).unwrap();
        assert_eq!(info.kind, ItemKind::File);
        assert_eq!(info.size, 5);
        assert!(info.mod_time > 0);
    }

    #[test]
    fn test_from_metadata_rejects_dir() {
        let dir = tempdir().unwrap();
        let meta = std::fs::symlink_metadata(dir.path()).unwrap();
        let err = ItemInfo::from_metadata("/", &meta).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidArgument(_)));
    }
}
