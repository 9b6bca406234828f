//! Shares: a synced directory bound to its engine
//!
//! A [`Share`] turns filesystem events and remote snapshots into engine
//! operations. Whichever side has the newer modification time for a path
//! wins; the other side is brought up to date.

use crate::cloud::{CloudStore, CloudTransport};
use crate::eft::{read_link_bytes, Eft};
use crate::model::{mod_time_nanos, normalize_path, Hash, ItemInfo, ItemKind, Snapshot};
use crate::upload::UploadTrigger;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const HMAC_KEY_CONTEXT: &str = "sharesync 2024 share name hmac key";
const SHARE_KEY_CONTEXT: &str = "sharesync 2024 new share key";

/// Persisted share configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareConfig {
    pub id: String,
    pub name: String,
    /// 32-byte share secret, hex encoded
    pub key: String,
}

impl ShareConfig {
    /// A new share with a freshly derived secret
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let material = format!("{}:{}:{}", name, nanos, std::process::id());
        let key = Hash::derive_key(SHARE_KEY_CONTEXT, material.as_bytes());
        let id = Hash::digest(&key).to_hex()[..16].to_string();

        ShareConfig {
            id,
            name,
            key: hex::encode(key),
        }
    }

    /// Path of a share's config file under `config_dir`
    pub fn path(config_dir: &Path, name: &str) -> PathBuf {
        config_dir.join("shares").join(format!("{}.json", name))
    }

    /// Load a share by name, `NotFound` when it has no config yet
    pub fn load(config_dir: &Path, name: &str) -> Result<Self> {
        let path = Self::path(config_dir, name);
        if !path.exists() {
            return Err(Error::NotFound(format!("share config {}", path.display())));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: ShareConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.key_bytes()?;
        Ok(config)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        let path = Self::path(config_dir, &self.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Load a share, creating and saving a new config if there is none
    pub fn load_or_new(config_dir: &Path, name: &str) -> Result<Self> {
        match Self::load(config_dir, name) {
            Err(e) if e.is_not_found() => {
                let config = Self::new(name);
                config.save(config_dir)?;
                info!(share = name, "created share config");
                Ok(config)
            }
            other => other,
        }
    }

    /// The decoded share secret
    pub fn key_bytes(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.key)
            .map_err(|e| Error::Config(format!("share {} key: {}", self.name, e)))?;
        <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
            Error::Config(format!(
                "share {} key must be 32 bytes, got {}",
                self.name,
                bytes.len()
            ))
        })
    }

    /// Key for hashing the share name
    pub fn hmac_key(&self) -> Result<[u8; 32]> {
        Ok(Hash::derive_key(HMAC_KEY_CONTEXT, &self.key_bytes()?))
    }

    /// The name the cloud knows this share by
    pub fn name_hmac(&self) -> Result<String> {
        Ok(Hash::keyed(&self.hmac_key()?, self.name.as_bytes()).to_hex())
    }
}

/// A synced directory and its engine
pub struct Share {
    config: ShareConfig,
    root: PathBuf,
    eft: Arc<Eft>,
    cloud: Option<Arc<dyn CloudTransport>>,
    trigger: Mutex<Option<UploadTrigger>>,
    /// Sequence for staging file names
    staged: AtomicU64,
}

impl Share {
    /// Open a share rooted at `root` with its engine in `data_dir`
    ///
    /// With a cloud transport, blobs missing locally are read from the cloud.
    pub fn open(
        config: ShareConfig,
        root: impl AsRef<Path>,
        data_dir: impl AsRef<Path>,
        cloud: Option<Arc<dyn CloudTransport>>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut eft = Eft::open(data_dir)?;
        if let Some(cloud) = &cloud {
            let remote = CloudStore::new(cloud.clone(), config.name_hmac()?);
            eft = eft.with_remote(Arc::new(remote));
        }

        Ok(Share {
            config,
            root,
            eft: Arc::new(eft),
            cloud,
            trigger: Mutex::new(None),
            staged: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn eft(&self) -> &Eft {
        &self.eft
    }

    pub fn cloud(&self) -> Option<&Arc<dyn CloudTransport>> {
        self.cloud.as_ref()
    }

    /// Route upload requests to a running upload loop
    pub fn set_trigger(&self, trigger: UploadTrigger) {
        *self.trigger.lock() = Some(trigger);
    }

    fn trigger_upload(&self) {
        if let Some(trigger) = self.trigger.lock().as_ref() {
            trigger.again();
        }
    }

    /// Share-relative path of a file under the share root
    pub fn rel_path(&self, full_path: &Path) -> Result<String> {
        let rel = full_path.strip_prefix(&self.root).map_err(|_| {
            Error::InvalidArgument(format!(
                "{} is outside share {}",
                full_path.display(),
                self.root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                    Error::InvalidArgument(format!("{} is not valid UTF-8", full_path.display()))
                })?),
                Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "{} is outside share {}",
                        full_path.display(),
                        self.root.display()
                    )))
                }
            }
        }
        Ok(normalize_path(&parts.join("/")))
    }

    /// On-disk location of a share-relative path
    pub fn full_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(normalize_path(rel_path).trim_start_matches('/'))
    }

    fn stored_info(&self, rel_path: &str) -> Result<Option<ItemInfo>> {
        match self.eft.get_info(rel_path) {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// A file under the share changed on disk
    pub fn got_local_update(&self, full_path: &Path) -> Result<()> {
        let rel = self.rel_path(full_path)?;
        let meta = fs::symlink_metadata(full_path)?;
        if meta.is_dir() {
            return Ok(());
        }

        if let Some(stored) = self.stored_info(&rel)? {
            if stored.mod_time > mod_time_nanos(&meta) {
                debug!(path = %rel, "stored copy is newer than disk");
                return self.got_remote_update(&rel);
            }
        }

        let info = ItemInfo::from_metadata(&rel, &meta)?;
        let staged = self.stage(full_path, info.kind)?;
        let stored = self.eft.put(info, &staged);
        if let Err(e) = fs::remove_file(&staged) {
            warn!(path = %staged.display(), error = %e, "failed to remove staged copy");
        }
        stored?;

        self.trigger_upload();
        Ok(())
    }

    /// A file under the share was deleted at `stamp` (unix nanoseconds)
    pub fn got_local_delete(&self, full_path: &Path, stamp: u64) -> Result<()> {
        let rel = self.rel_path(full_path)?;
        let Some(stored) = self.stored_info(&rel)? else {
            return Ok(());
        };

        if stored.mod_time > stamp {
            debug!(path = %rel, "stored copy is newer than delete, restoring");
            return self.got_remote_update(&rel);
        }

        self.eft.delete(&rel)?;
        self.trigger_upload();
        Ok(())
    }

    /// The stored version of a path may be newer than the disk
    pub fn got_remote_update(&self, rel_path: &str) -> Result<()> {
        let info = self.eft.get_info(rel_path)?;
        let full = self.full_path(rel_path);

        if let Ok(meta) = fs::symlink_metadata(&full) {
            if !meta.is_dir() && mod_time_nanos(&meta) > info.mod_time {
                debug!(path = %info.path, "disk copy is newer than stored");
                return self.got_local_update(&full);
            }
        }

        self.eft.get(rel_path, &full)?;
        debug!(path = %info.path, "wrote stored copy to disk");
        Ok(())
    }

    /// Remote deletions need tombstones, which snapshots do not carry
    pub fn got_remote_delete(&self, rel_path: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "remote delete of {}",
            normalize_path(rel_path)
        )))
    }

    /// Merge a remote snapshot list and bring changed files to disk
    pub fn merge_remote(&self, remote_hash: &Hash) -> Result<Snapshot> {
        let before: HashMap<String, ItemInfo> = self
            .eft
            .list()?
            .into_iter()
            .map(|info| (info.path.clone(), info))
            .collect();

        let merged = self.eft.merge_remote(remote_hash)?;

        for info in self.eft.list()? {
            if before.get(&info.path) != Some(&info) {
                self.got_remote_update(&info.path)?;
            }
        }
        Ok(merged)
    }

    /// Feed every file under the share root through [`got_local_update`]
    ///
    /// [`got_local_update`]: Self::got_local_update
    pub fn scan(&self) -> Result<usize> {
        let mut pending = vec![self.root.clone()];
        let mut count = 0;
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if fs::symlink_metadata(&path)?.is_dir() {
                    pending.push(path);
                } else {
                    self.got_local_update(&path)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Copy a file's content (or a symlink's target) to a private file
    fn stage(&self, full_path: &Path, kind: ItemKind) -> Result<PathBuf> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = self.staged.fetch_add(1, Ordering::Relaxed);
        let staged = self.eft.dir().join(format!("staged-{}-{}", nanos, seq));

        match kind {
            ItemKind::File => {
                fs::copy(full_path, &staged)?;
            }
            ItemKind::Symlink => {
                fs::write(&staged, read_link_bytes(full_path)?)?;
            }
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_share(base: &Path) -> Share {
        Share::open(
            ShareConfig::new("docs"),
            base.join("root"),
            base.join("data"),
            None,
        )
        .unwrap()
    }

    fn set_mtime(path: &Path, nanos: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_nanos(nanos))
            .unwrap();
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let config = ShareConfig::load_or_new(dir.path(), "photos").unwrap();
        assert_eq!(config.key_bytes().unwrap().len(), 32);

        let again = ShareConfig::load_or_new(dir.path(), "photos").unwrap();
        assert_eq!(again, config);
        assert_eq!(again.name_hmac().unwrap(), config.name_hmac().unwrap());
        assert!(ShareConfig::path(dir.path(), "photos").exists());
    }

    #[test]
    fn test_config_rejects_bad_key() {
        let dir = tempdir().unwrap();
        let mut config = ShareConfig::new("bad");
        config.key = "abcd".into();
        config.save(dir.path()).unwrap();

        let err = ShareConfig::load(dir.path(), "bad").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(ShareConfig::load(dir.path(), "missing")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_name_hmac_depends_on_key() {
        let a = ShareConfig::new("same");
        let mut b = a.clone();
        b.key = hex::encode([7u8; 32]);
        assert_ne!(a.name_hmac().unwrap(), b.name_hmac().unwrap());
    }

    #[test]
    fn test_rel_path() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());

        let inside = share.root().join("a/b.txt");
        assert_eq!(share.rel_path(&inside).unwrap(), "/a/b.txt");
        assert_eq!(share.full_path("/a/b.txt"), inside);

        let err = share.rel_path(&dir.path().join("elsewhere")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_local_update_and_delete() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        let file = share.root().join("notes.txt");
        fs::write(&file, b"v1").unwrap();
        set_mtime(&file, 1_000);

        share.got_local_update(&file).unwrap();
        let info = share.eft().get_info("/notes.txt").unwrap();
        assert_eq!(info.mod_time, 1_000);
        assert_eq!(info.size, 2);

        // A delete older than the stored copy restores the file
        fs::remove_file(&file).unwrap();
        share.got_local_delete(&file, 500).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"v1");

        fs::remove_file(&file).unwrap();
        share.got_local_delete(&file, 2_000).unwrap();
        assert!(share.eft().get_info("/notes.txt").unwrap_err().is_not_found());

        // Unknown paths are ignored
        share.got_local_delete(&file, 3_000).unwrap();
    }

    #[test]
    fn test_older_disk_copy_is_replaced() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        let file = share.root().join("a.txt");

        fs::write(&file, b"new").unwrap();
        set_mtime(&file, 2_000);
        share.got_local_update(&file).unwrap();

        fs::write(&file, b"old").unwrap();
        set_mtime(&file, 1_000);
        share.got_local_update(&file).unwrap();

        assert_eq!(fs::read(&file).unwrap(), b"new");
        assert_eq!(share.eft().get_info("/a.txt").unwrap().mod_time, 2_000);
    }

    #[test]
    fn test_directories_are_ignored() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        let sub = share.root().join("sub");
        fs::create_dir_all(&sub).unwrap();

        share.got_local_update(&sub).unwrap();
        assert!(share.eft().list().unwrap().is_empty());
    }

    #[test]
    fn test_scan() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        fs::create_dir_all(share.root().join("x/y")).unwrap();
        fs::write(share.root().join("top.txt"), b"1").unwrap();
        fs::write(share.root().join("x/y/deep.txt"), b"2").unwrap();

        assert_eq!(share.scan().unwrap(), 2);
        let paths: Vec<String> = share
            .eft()
            .list()
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths, vec!["/top.txt", "/x/y/deep.txt"]);
    }

    #[test]
    fn test_staging_names_are_unique() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        let file = share.root().join("a.txt");
        fs::write(&file, b"a").unwrap();

        let first = share.stage(&file, ItemKind::File).unwrap();
        let second = share.stage(&file, ItemKind::File).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_symlink_target_round_trips() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        let target = OsStr::from_bytes(b"caf\xe9/\xff.txt");
        let link = share.root().join("link");
        std::os::unix::fs::symlink(target, &link).unwrap();

        share.got_local_update(&link).unwrap();
        let info = share.eft().get_info("/link").unwrap();
        assert_eq!(info.kind, ItemKind::Symlink);

        let restored = dir.path().join("restored");
        share.eft().get("/link", &restored).unwrap();
        assert_eq!(fs::read_link(&restored).unwrap().as_os_str(), target);
    }

    #[test]
    fn test_remote_delete_is_unsupported() {
        let dir = tempdir().unwrap();
        let share = open_share(dir.path());
        assert!(share.got_remote_delete("/a").unwrap_err().is_unsupported());
    }
}
