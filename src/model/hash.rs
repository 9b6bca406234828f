//! BLAKE3 block addresses

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a block: the BLAKE3 hash of its typed content
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const LEN: usize = 32;

    /// Empty slot and empty trie
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// `None` unless `bytes` is exactly [`Hash::LEN`] long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Hash)
    }

    pub fn digest(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// Digest of the concatenation of `parts`
    pub fn digest_many(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        parts.iter().for_each(|part| {
            hasher.update(part);
        });
        Hash(*hasher.finalize().as_bytes())
    }

    /// MAC of `data` under a 32-byte key
    pub fn keyed(key: &[u8; 32], data: &[u8]) -> Self {
        Hash(*blake3::keyed_hash(key, data).as_bytes())
    }

    /// Sub-key for `context`, derived from `material`
    pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
        blake3::derive_key(context, material)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Hash::from_slice(&hex::decode(s)?).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// First four bytes in hex, for logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}
