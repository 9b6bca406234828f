//! Single-file object store with content-addressed storage
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("SHARESYN")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - refs_offset: 8 bytes (u64 LE)
//!   - refs_count: 8 bytes (u64 LE)
//!   - reserved: 16 bytes
//!
//! [OBJECTS: variable]
//!   - compressed blobs, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (hash, offset, size, block flags) entries
//!
//! [REFS: variable]
//!   - ref names → hashes
//!
//! [OBJECTS written after the sync ...]
//! ```
//!
//! Every `sync` appends a new index + refs region and repoints the header, so
//! a crash between syncs loses only the unsynced objects.

use crate::model::Hash;
use crate::store::blob::Blob;
use crate::store::ContentStore;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const HEADER_SIZE: u64 = 64;

/// 32 hash + 8 offset + 4 size + 1 flags
const INDEX_ENTRY_SIZE: usize = 45;

/// Blobs with less uncompressed data than this are tail blocks
pub const BLOCK_SIZE: usize = 64 * 1024;

const FLAG_REMOTE: u8 = 1;
const FLAG_TAIL: u8 = 1 << 1;
const FLAG_DEAD: u8 = 1 << 2;

/// Storage record for one stored blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Position of the block in the file, in write order
    pub id: u64,
    pub hash: Hash,
    /// Present on the cloud side
    pub remote: bool,
    /// Short, unpacked block
    pub tail: bool,
    /// No longer referenced, should be deleted
    pub dead: bool,
}

/// Index entry for an object
#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
    flags: u8,
}

/// In-memory index for fast lookups
struct Index {
    entries: HashMap<Hash, IndexEntry>,
}

impl Index {
    fn new() -> Self {
        Index {
            entries: HashMap::new(),
        }
    }

    fn set_flag(&mut self, hash: &Hash, flag: u8) -> bool {
        match self.entries.get_mut(hash) {
            Some(entry) => {
                entry.flags |= flag;
                true
            }
            None => false,
        }
    }

    /// Clear a flag, returning whether it was set
    fn clear_flag(&mut self, hash: &Hash, flag: u8) -> bool {
        match self.entries.get_mut(hash) {
            Some(entry) if entry.flags & flag != 0 => {
                entry.flags &= !flag;
                true
            }
            _ => false,
        }
    }
}

/// A content-addressed object store backed by a single file
pub struct ObjectStore {
    /// Path to the store file
    path: std::path::PathBuf,
    /// The file handle
    file: RwLock<File>,
    /// In-memory index
    index: RwLock<Index>,
    /// Refs (name → hash)
    refs: RwLock<HashMap<String, Hash>>,
    /// Current append position
    write_offset: RwLock<u64>,
    /// Index or refs changed since the last sync
    dirty: AtomicBool,
}

impl ObjectStore {
    /// Create a new store file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(ObjectStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(Index::new()),
            refs: RwLock::new(HashMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
            dirty: AtomicBool::new(false),
        })
    }

    /// Open an existing store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| Error::InvalidFile("Truncated header".into()))?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = le_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let object_count = le_u64(&header[16..24]);
        let index_offset = le_u64(&header[24..32]);
        let refs_offset = le_u64(&header[32..40]);
        let refs_count = le_u64(&header[40..48]);

        let mut index = Index::new();
        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut entry_buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut entry_buf)?;

                let mut hash_bytes = [0u8; 32];
                hash_bytes.copy_from_slice(&entry_buf[0..32]);
                let hash = Hash::from_bytes(hash_bytes);

                let offset = le_u64(&entry_buf[32..40]);
                let size = le_u32(&entry_buf[40..44]);
                let flags = entry_buf[44];

                index.entries.insert(
                    hash,
                    IndexEntry {
                        offset,
                        size,
                        flags,
                    },
                );
            }
        }

        let mut refs = HashMap::new();
        if refs_offset > 0 && refs_count > 0 {
            file.seek(SeekFrom::Start(refs_offset))?;
            for _ in 0..refs_count {
                let mut len_buf = [0u8; 2];
                file.read_exact(&mut len_buf)?;
                let name_len = u16::from_le_bytes(len_buf) as usize;

                let mut name_buf = vec![0u8; name_len];
                file.read_exact(&mut name_buf)?;
                let name = String::from_utf8_lossy(&name_buf).to_string();

                let mut hash_buf = [0u8; 32];
                file.read_exact(&mut hash_buf)?;
                refs.insert(name, Hash::from_bytes(hash_buf));
            }
        }

        // Never write over the last synced index; a crash must leave it readable
        let write_offset = file.seek(SeekFrom::End(0))?.max(HEADER_SIZE);

        Ok(ObjectStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            refs: RwLock::new(refs),
            write_offset: RwLock::new(write_offset),
            dirty: AtomicBool::new(false),
        })
    }

    /// Open or create a store file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Store a blob, returns its hash
    pub fn put_blob(&self, blob: &Blob) -> Result<Hash> {
        let hash = blob.hash();
        if self.contains_hash(&hash) {
            // Re-adding a dead blob makes it live again
            if self.index.write().clear_flag(&hash, FLAG_DEAD) {
                self.touch();
            }
            return Ok(hash);
        }

        let compressed = blob.compress()?;
        let flags = if blob.size() < BLOCK_SIZE { FLAG_TAIL } else { 0 };
        self.append(hash, &compressed, flags)?;
        Ok(hash)
    }

    /// Store already-compressed bytes received from elsewhere
    ///
    /// The bytes are verified against `hash` before they are written.
    pub fn put_stored(&self, hash: &Hash, stored: &[u8], remote: bool) -> Result<()> {
        if self.contains_hash(hash) {
            let mut index = self.index.write();
            let mut changed = index.clear_flag(hash, FLAG_DEAD);
            if remote {
                changed |= index.set_flag(hash, FLAG_REMOTE);
            }
            if changed {
                self.touch();
            }
            return Ok(());
        }

        let blob = Blob::decompress_verified(hash, stored)?;
        let mut flags = if blob.size() < BLOCK_SIZE { FLAG_TAIL } else { 0 };
        if remote {
            flags |= FLAG_REMOTE;
        }
        self.append(*hash, stored, flags)
    }

    fn append(&self, hash: Hash, stored: &[u8], flags: u8) -> Result<()> {
        let size = u32::try_from(stored.len())
            .map_err(|_| Error::InvalidArgument(format!("blob {} too large", hash.short())))?;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(stored)?;

            *write_offset = offset + size as u64;
            offset
        };

        self.index.write().entries.insert(
            hash,
            IndexEntry {
                offset,
                size,
                flags,
            },
        );
        self.touch();
        Ok(())
    }

    fn touch(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Retrieve the stored (compressed) bytes of a blob
    pub fn get_stored(&self, hash: &Hash) -> Result<Vec<u8>> {
        let entry = {
            let index = self.index.read();
            index.entries.get(hash).cloned()
        };

        let entry = entry.ok_or_else(|| Error::NotFound(hash.to_hex()))?;

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(entry.offset))?;

        let mut data = vec![0u8; entry.size as usize];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Retrieve a blob by hash
    pub fn get_blob(&self, hash: &Hash) -> Result<Blob> {
        let data = self.get_stored(hash)?;
        Blob::decompress(&data)
    }

    /// Check if a hash exists
    pub fn contains_hash(&self, hash: &Hash) -> bool {
        let index = self.index.read();
        index.entries.contains_key(hash)
    }

    // === Block bookkeeping ===

    /// All block records, in write order
    pub fn blocks(&self) -> Vec<Block> {
        let index = self.index.read();
        let mut entries: Vec<_> = index.entries.iter().collect();
        entries.sort_by_key(|(_, e)| e.offset);

        entries
            .into_iter()
            .enumerate()
            .map(|(id, (hash, e))| Block {
                id: id as u64,
                hash: *hash,
                remote: e.flags & FLAG_REMOTE != 0,
                tail: e.flags & FLAG_TAIL != 0,
                dead: e.flags & FLAG_DEAD != 0,
            })
            .collect()
    }

    /// Find the block record for a hash
    pub fn find_block(&self, hash: &Hash) -> Option<Block> {
        self.blocks().into_iter().find(|b| b.hash == *hash)
    }

    /// Record that these blocks are present on the cloud side
    pub fn mark_remote(&self, hashes: &[Hash]) {
        let mut index = self.index.write();
        for hash in hashes {
            index.set_flag(hash, FLAG_REMOTE);
        }
        self.touch();
    }

    /// Mark a block as garbage. Returns false when the block is unknown.
    pub fn mark_dead(&self, hash: &Hash) -> bool {
        let found = self.index.write().set_flag(hash, FLAG_DEAD);
        if found {
            self.touch();
        }
        found
    }

    /// Drop dead blocks from the index
    ///
    /// Their bytes stay in the file until it is rewritten.
    pub fn purge_dead(&self, hashes: &[Hash]) -> usize {
        let mut index = self.index.write();
        let mut purged = 0;
        for hash in hashes {
            let dead = index
                .entries
                .get(hash)
                .is_some_and(|e| e.flags & FLAG_DEAD != 0);
            if dead {
                index.entries.remove(hash);
                purged += 1;
            }
        }
        if purged > 0 {
            self.touch();
        }
        purged
    }

    // === Ref Management ===

    /// Get the hash a ref points to
    pub fn get_ref(&self, ref_name: &str) -> Option<Hash> {
        let refs = self.refs.read();
        refs.get(ref_name).copied()
    }

    /// Point a ref at a hash
    pub fn set_ref(&self, ref_name: &str, hash: Hash) {
        let mut refs = self.refs.write();
        refs.insert(ref_name.to_string(), hash);
        self.touch();
    }

    /// Get the number of objects in the store
    pub fn object_count(&self) -> usize {
        let index = self.index.read();
        index.entries.len()
    }

    /// Flush changes and write index to disk
    ///
    /// The index and refs are appended after the objects and the header is
    /// pointed at them; older copies become dead space.
    pub fn sync(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_index();
        if result.is_err() {
            self.touch();
        }
        result
    }

    fn write_index(&self) -> Result<()> {
        let index = self.index.read();
        let refs = self.refs.read();
        let mut write_offset = self.write_offset.write();
        let mut file = self.file.write();

        let index_size = index.entries.len() * INDEX_ENTRY_SIZE;
        let index_offset = *write_offset;
        let refs_offset = index_offset + index_size as u64;

        // Sort by hash for determinism
        let mut entries: Vec<_> = index.entries.iter().collect();
        entries.sort_by_key(|(h, _)| h.as_bytes());

        let mut buf = Vec::with_capacity(index_size);
        for (hash, entry) in entries {
            buf.extend_from_slice(hash.as_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.size.to_le_bytes());
            buf.push(entry.flags);
        }

        // Format: for each ref: name_len (u16) + name + hash (32 bytes)
        let mut ref_list: Vec<_> = refs.iter().collect();
        ref_list.sort_by_key(|(name, _)| *name);

        for (name, hash) in ref_list {
            let name_bytes = name.as_bytes();
            buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(name_bytes);
            buf.extend_from_slice(hash.as_bytes());
        }

        file.seek(SeekFrom::Start(index_offset))?;
        file.write_all(&buf)?;
        file.sync_all()?;

        // Header last, so it only ever names a fully written index
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.entries.len() as u64).to_le_bytes())?;
        file.write_all(&index_offset.to_le_bytes())?;
        file.write_all(&refs_offset.to_le_bytes())?;
        file.write_all(&(refs.len() as u64).to_le_bytes())?;
        file.sync_all()?;

        *write_offset = index_offset + buf.len() as u64;
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentStore for ObjectStore {
    fn get(&self, hash: &Hash) -> Result<Blob> {
        self.get_blob(hash)
    }

    fn put(&self, blob: &Blob) -> Result<Hash> {
        self.put_blob(blob)
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.contains_hash(hash)
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
