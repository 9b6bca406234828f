//! Per-share engine
//!
//! An [`Eft`] owns one share's object store and its current snapshot list.
//! Every change to the list (local writes, deletes, merges) happens inside a
//! [`Transaction`], which holds the share's writer lock until it commits or
//! is dropped. Dropping a transaction without committing leaves the
//! previously committed list in place.

use crate::model::{Hash, ItemInfo, ItemKind, Snapshot, SnapshotList};
use crate::store::{Archive, Blob, BlobType, ContentStore, ObjectStore};
use crate::trie::{MergeEngine, PathTrie};
use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// File name of the object store inside a share's data directory
pub const STORE_FILE: &str = "blocks.store";

/// Ref naming the committed snapshot list
const SNAPSHOTS_REF: &str = "snapshots";

/// Blocks changed since the last upload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Live blocks not yet on the cloud side
    pub adds: Vec<Hash>,
    /// Blocks no longer referenced
    pub dels: Vec<Hash>,
}

impl Checkpoint {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.dels.is_empty()
    }
}

/// The encrypted file trie of one share
pub struct Eft {
    dir: PathBuf,
    store: ObjectStore,
    /// Authoritative copy of the share, read on local misses
    remote: Option<Arc<dyn ContentStore>>,
    /// Committed snapshot list; the mutex is the share's writer lock
    snapshots: Mutex<SnapshotList>,
}

impl Eft {
    /// Open the engine in `dir`, creating an empty share if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let store = ObjectStore::open_or_create(dir.join(STORE_FILE))?;

        let snapshots = match store.get_ref(SNAPSHOTS_REF) {
            Some(hash) => load_list(&store, &hash)?,
            None => {
                let list = SnapshotList::initial();
                let hash = store.put_blob(&list_blob(&list)?)?;
                store.set_ref(SNAPSHOTS_REF, hash);
                store.sync()?;
                debug!(dir = %dir.display(), "initialized share store");
                list
            }
        };

        Ok(Eft {
            dir,
            store,
            remote: None,
            snapshots: Mutex::new(snapshots),
        })
    }

    /// Read blobs missing locally from `remote`
    pub fn with_remote(mut self, remote: Arc<dyn ContentStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The underlying object store
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// The committed snapshot list
    pub fn snapshots(&self) -> SnapshotList {
        self.snapshots.lock().clone()
    }

    /// Hash of the committed snapshot list; this is what remotes exchange
    pub fn snapshot_list_hash(&self) -> Result<Hash> {
        Ok(list_blob(&self.snapshots.lock())?.hash())
    }

    /// The current snapshot
    pub fn head(&self) -> Result<Snapshot> {
        self.snapshots.lock().single()
    }

    /// Take the writer lock and start a transaction
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            eft: self,
            current: self.snapshots.lock(),
        }
    }

    // === Upward API ===

    /// Item info for a path, `NotFound` when absent
    pub fn get_info(&self, rel_path: &str) -> Result<ItemInfo> {
        let trie = PathTrie::load(self, &self.head()?.root)?;
        trie.get(self, rel_path)?
            .ok_or_else(|| Error::NotFound(format!("item {}", rel_path)))
    }

    /// Every item in the current snapshot, sorted by path
    pub fn list(&self) -> Result<Vec<ItemInfo>> {
        PathTrie::load(self, &self.head()?.root)?.items(self)
    }

    /// Store `content_file` as the content of `info` and commit the item
    ///
    /// For symlinks the file holds the link target. Returns the stored info
    /// with its content hash and size filled in.
    pub fn put(&self, mut info: ItemInfo, content_file: &Path) -> Result<ItemInfo> {
        let data = fs::read(content_file)?;
        info.size = data.len() as u64;
        info.content_hash = self.store.put_blob(&Blob::new(BlobType::Data, data))?;

        self.update(|trie| {
            let replaced = trie.lookup(self, &info.path)?;
            let hash = trie.put(self, &info)?;
            if let Some((old, _)) = replaced {
                if old != hash {
                    self.store.mark_dead(&old);
                }
            }
            Ok(())
        })?;

        debug!(path = %info.path, size = info.size, "stored item");
        Ok(info)
    }

    /// Remove a path from the current snapshot
    pub fn delete(&self, rel_path: &str) -> Result<()> {
        self.update(|trie| match trie.remove(self, rel_path)? {
            Some(hash) => {
                self.store.mark_dead(&hash);
                Ok(())
            }
            None => Err(Error::NotFound(format!("item {}", rel_path))),
        })?;
        debug!(path = rel_path, "deleted item");
        Ok(())
    }

    /// Write the content of `rel_path` to `dest`, restoring its mtime
    pub fn get(&self, rel_path: &str, dest: &Path) -> Result<ItemInfo> {
        let info = self.get_info(rel_path)?;
        let data = self
            .get_typed(&info.content_hash, BlobType::Data)
            .map_err(|e| e.context(format!("content of {}", info.path)))?
            .data;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        match info.kind {
            ItemKind::File => write_file(&data, &info, dest)?,
            ItemKind::Symlink => write_symlink(&data, dest)?,
        }
        Ok(info)
    }

    /// Blocks to upload and blocks to drop since the last finished checkpoint
    pub fn make_checkpoint(&self) -> Checkpoint {
        let mut checkpoint = Checkpoint::default();
        for block in self.store.blocks() {
            if block.dead {
                checkpoint.dels.push(block.hash);
            } else if !block.remote {
                checkpoint.adds.push(block.hash);
            }
        }
        checkpoint
    }

    /// Record a checkpoint as uploaded
    pub fn finish_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.store.mark_remote(&checkpoint.adds);
        let purged = self.store.purge_dead(&checkpoint.dels);
        self.store.sync()?;
        info!(
            uploaded = checkpoint.adds.len(),
            purged, "finished checkpoint"
        );
        Ok(())
    }

    /// Start an upload archive in the share directory
    pub fn new_archive(&self) -> Result<Archive> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Archive::create(self.dir.join(format!("upload-{}.arc", stamp)))
    }

    /// Merge the snapshot list stored at `remote_hash` into the local one
    ///
    /// Holds the writer lock for the whole load, merge and commit. Any error
    /// leaves the committed list untouched.
    pub fn merge_remote(&self, remote_hash: &Hash) -> Result<Snapshot> {
        let txn = self.begin();
        let local = txn.snapshots().single()?;
        let remote = txn.load_snapshots_from(remote_hash)?.single()?;

        let merged = MergeEngine::new(self).merge_snapshots(local, remote)?;
        if merged == remote {
            txn.commit_hash(remote_hash)?;
            info!(root = %merged.root.short(), "fast-forwarded to remote snapshot");
        } else if merged == local {
            debug!("remote snapshot has nothing new");
        } else {
            txn.commit(SnapshotList::new(vec![merged]))?;
            info!(root = %merged.root.short(), "committed merged snapshot");
        }
        Ok(merged)
    }

    /// Flush the object store index
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Run `f` against the current trie and commit the new root
    fn update<T>(&self, f: impl FnOnce(&mut PathTrie) -> Result<T>) -> Result<T> {
        let txn = self.begin();
        let head = txn.snapshots().single()?;
        let mut trie = PathTrie::load(self, &head.root)?;

        let out = f(&mut trie)?;
        let root = trie.save(self)?;
        txn.commit(SnapshotList::new(vec![Snapshot::new(head.id, root)]))?;
        Ok(out)
    }
}

impl ContentStore for Eft {
    fn get(&self, hash: &Hash) -> Result<Blob> {
        match self.store.get_blob(hash) {
            Err(e) if e.is_not_found() => {}
            found => return found,
        }

        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| Error::NotFound(hash.to_hex()))?;
        let blob = remote.get(hash)?;
        if blob.hash() != *hash {
            return Err(Error::Corruption(format!(
                "remote returned wrong blob for {}",
                hash.short()
            )));
        }

        self.store.put_blob(&blob)?;
        self.store.mark_remote(std::slice::from_ref(hash));
        debug!(hash = %hash.short(), "fetched blob from remote");
        Ok(blob)
    }

    fn put(&self, blob: &Blob) -> Result<Hash> {
        self.store.put_blob(blob)
    }

    fn contains(&self, hash: &Hash) -> bool {
        self.store.contains_hash(hash)
    }
}

/// Writer-locked view of the snapshot list
pub struct Transaction<'a> {
    eft: &'a Eft,
    current: MutexGuard<'a, SnapshotList>,
}

impl<'a> Transaction<'a> {
    /// The list as committed when the transaction began
    pub fn snapshots(&self) -> &SnapshotList {
        &self.current
    }

    /// Load a snapshot list by hash, fetching it from the remote if needed
    pub fn load_snapshots_from(&self, hash: &Hash) -> Result<SnapshotList> {
        load_list(self.eft, hash)
    }

    /// Store `list` and make it the committed list
    pub fn commit(self, list: SnapshotList) -> Result<Hash> {
        let hash = self.eft.store.put_blob(&list_blob(&list)?)?;
        self.finish(list, hash)
    }

    /// Commit an already stored list by hash, skipping re-encoding
    pub fn commit_hash(self, hash: &Hash) -> Result<Hash> {
        let list = load_list(self.eft, hash)?;
        self.finish(list, *hash)
    }

    /// Release the lock without changing anything
    pub fn abort(self) {}

    fn finish(mut self, list: SnapshotList, hash: Hash) -> Result<Hash> {
        let store = &self.eft.store;
        let previous = store.get_ref(SNAPSHOTS_REF);
        store.set_ref(SNAPSHOTS_REF, hash);
        if let Err(e) = store.sync() {
            if let Some(previous) = previous {
                store.set_ref(SNAPSHOTS_REF, previous);
            }
            return Err(e);
        }

        *self.current = list;
        debug!(list = %hash.short(), "committed snapshot list");
        Ok(hash)
    }
}

pub(crate) fn list_blob(list: &SnapshotList) -> Result<Blob> {
    Ok(Blob::new(BlobType::Snapshots, bincode::serialize(list)?))
}

fn load_list(store: &dyn ContentStore, hash: &Hash) -> Result<SnapshotList> {
    let blob = store
        .get_typed(hash, BlobType::Snapshots)
        .map_err(|e| e.context(format!("snapshot list {}", hash.short())))?;
    Ok(bincode::deserialize(&blob.data)?)
}

/// Write a file beside `dest` and rename it into place
///
/// The rename replaces whatever sits at `dest`, a symlink included, without
/// following it.
fn write_file(data: &[u8], info: &ItemInfo, dest: &Path) -> Result<()> {
    let name = dest
        .file_name()
        .ok_or_else(|| Error::InvalidArgument(format!("no file name in {}", dest.display())))?;
    let mut staged_name = std::ffi::OsString::from(".");
    staged_name.push(name);
    staged_name.push(".sharesync-tmp");
    let staged = dest.with_file_name(staged_name);

    let written = (|| -> Result<()> {
        let mut file = fs::File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staged)?;
        file.write_all(data)?;
        file.set_modified(UNIX_EPOCH + Duration::from_nanos(info.mod_time))?;
        drop(file);
        set_mode(&staged, info.mode)?;
        fs::rename(&staged, dest)?;
        Ok(())
    })();
    if written.is_err() {
        let _ = fs::remove_file(&staged);
    }
    written
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// The raw bytes of a symlink's target
pub fn read_link_bytes(path: &Path) -> Result<Vec<u8>> {
    let target = fs::read_link(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Ok(target.as_os_str().as_bytes().to_vec())
    }
    #[cfg(not(unix))]
    {
        Ok(target.to_string_lossy().as_bytes().to_vec())
    }
}

#[cfg(unix)]
fn write_symlink(target: &[u8], dest: &Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    if fs::symlink_metadata(dest).is_ok() {
        fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(target), dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_symlink(_target: &[u8], dest: &Path) -> Result<()> {
    Err(Error::Unsupported(format!(
        "cannot create symlink {} on this platform",
        dest.display()
    )))
}
