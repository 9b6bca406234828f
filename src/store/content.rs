//! The content store seam
//!
//! Everything above the storage layer talks to a [`ContentStore`]: get a blob
//! by hash, put a blob and learn its hash. The single-file [`ObjectStore`],
//! the in-memory [`MemoryStore`] and the per-share engine all implement it.
//!
//! [`ObjectStore`]: super::ObjectStore

use super::{Blob, BlobType};
use crate::model::Hash;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Hash-addressed blob storage
pub trait ContentStore: Send + Sync {
    /// Fetch a blob, `NotFound` when the hash is unknown
    fn get(&self, hash: &Hash) -> Result<Blob>;

    /// Store a blob, returning its hash. Storing an existing blob is a no-op.
    fn put(&self, blob: &Blob) -> Result<Hash>;

    /// Whether the blob is available without further I/O
    fn contains(&self, hash: &Hash) -> bool;

    /// Fetch a blob and check its type
    fn get_typed(&self, hash: &Hash, blob_type: BlobType) -> Result<Blob> {
        self.get(hash)?.expect_type(blob_type)
    }
}

impl<S: ContentStore + ?Sized> ContentStore for std::sync::Arc<S> {
    fn get(&self, hash: &Hash) -> Result<Blob> {
        (**self).get(hash)
    }

    fn put(&self, blob: &Blob) -> Result<Hash> {
        (**self).put(blob)
    }

    fn contains(&self, hash: &Hash) -> bool {
        (**self).contains(hash)
    }
}

/// A content store that lives entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<Hash, Blob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// All stored hashes, sorted
    pub fn hashes(&self) -> Vec<Hash> {
        let mut hashes: Vec<Hash> = self.blobs.read().keys().copied().collect();
        hashes.sort();
        hashes
    }
}

impl ContentStore for MemoryStore {
    fn get(&self, hash: &Hash) -> Result<Blob> {
        self.blobs
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(hash.to_hex()))
    }

    fn put(&self, blob: &Blob) -> Result<Hash> {
        let hash = blob.hash();
        self.blobs.write().entry(hash).or_insert_with(|| blob.clone());
        Ok(hash)
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.blobs.read().contains_key(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_dedup() {
        let store = MemoryStore::new();
        let blob = Blob::new(BlobType::Data, b"same".to_vec());

        let h1 = store.put(&blob).unwrap();
        let h2 = store.put(&blob).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&h1).unwrap(), blob);
    }

    #[test]
    fn test_memory_store_missing() {
        let store = MemoryStore::new();
        let err = store.get(&Hash::digest(b"nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_get_typed_checks_type() {
        let store = MemoryStore::new();
        let hash = store.put(&Blob::new(BlobType::Info, vec![7])).unwrap();
        assert!(store.get_typed(&hash, BlobType::Info).is_ok());
        assert!(store.get_typed(&hash, BlobType::Node).is_err());
    }
}
