//! Blob type - the unit of content-addressed storage

use crate::model::Hash;
use crate::{Error, Result};

/// Type tag for blobs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobType {
    /// A trie node
    Node,
    /// An item info record
    Info,
    /// File content
    Data,
    /// A share's snapshot list
    Snapshots,
}

impl BlobType {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobType::Node => 0,
            BlobType::Info => 1,
            BlobType::Data => 2,
            BlobType::Snapshots => 3,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobType::Node),
            1 => Some(BlobType::Info),
            2 => Some(BlobType::Data),
            3 => Some(BlobType::Snapshots),
            _ => None,
        }
    }
}

/// A blob is a typed, compressed chunk of data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    /// Type of content
    pub blob_type: BlobType,
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a new blob
    pub fn new(blob_type: BlobType, data: Vec<u8>) -> Self {
        Blob { blob_type, data }
    }

    /// Compute the content hash
    pub fn hash(&self) -> Hash {
        // Type is part of the address so a node and an info never collide
        Hash::digest_many(&[&[self.blob_type.as_byte()], &self.data])
    }

    /// Compress the blob for storage
    pub fn compress(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        output.push(self.blob_type.as_byte());
        let compressed = zstd::encode_all(self.data.as_slice(), 3)?;
        output.extend(compressed);
        Ok(output)
    }

    /// Decompress a blob from storage
    pub fn decompress(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Corruption("Empty blob data".into()));
        }

        let blob_type = BlobType::from_byte(data[0])
            .ok_or_else(|| Error::Corruption(format!("Invalid blob type: {}", data[0])))?;

        let decompressed = zstd::decode_all(&data[1..])?;

        Ok(Blob {
            blob_type,
            data: decompressed,
        })
    }

    /// Decompress stored bytes and check them against the hash they were filed under
    pub fn decompress_verified(expected: &Hash, data: &[u8]) -> Result<Self> {
        let blob = Self::decompress(data)?;
        let actual = blob.hash();
        if actual != *expected {
            return Err(Error::Corruption(format!(
                "blob {} hashes to {}",
                expected.short(),
                actual.short()
            )));
        }
        Ok(blob)
    }

    /// Fail with `Corruption` unless this blob has the given type
    pub fn expect_type(self, blob_type: BlobType) -> Result<Self> {
        if self.blob_type != blob_type {
            return Err(Error::Corruption(format!(
                "Expected {:?}, got {:?}",
                blob_type, self.blob_type
            )));
        }
        Ok(self)
    }

    /// Get the size of the uncompressed data
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let original = Blob::new(BlobType::Data, b"hello world".to_vec());
        let compressed = original.compress().unwrap();
        let restored = Blob::decompress(&compressed).unwrap();

        assert_eq!(original, restored);
    }

    #[test]
    fn test_blob_hash_includes_type() {
        let node = Blob::new(BlobType::Node, b"data".to_vec());
        let info = Blob::new(BlobType::Info, b"data".to_vec());

        assert_ne!(node.hash(), info.hash());
    }

    #[test]
    fn test_verified_rejects_wrong_hash() {
        let blob = Blob::new(BlobType::Data, b"payload".to_vec());
        let stored = blob.compress().unwrap();

        assert!(Blob::decompress_verified(&blob.hash(), &stored).is_ok());
        let err = Blob::decompress_verified(&Hash::digest(b"other"), &stored).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_expect_type() {
        let blob = Blob::new(BlobType::Info, vec![1, 2, 3]);
        assert!(blob.clone().expect_type(BlobType::Info).is_ok());
        assert!(blob.expect_type(BlobType::Node).is_err());
    }
}
