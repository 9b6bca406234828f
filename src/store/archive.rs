//! Upload archives
//!
//! An archive packs stored blobs into one transferable file:
//! ```text
//! magic: 8 bytes ("SSARCHV1")
//! repeated:
//!   - hash: 32 bytes
//!   - len: 4 bytes (u32 LE)
//!   - stored blob bytes (type byte + zstd data)
//! ```

use super::ObjectStore;
use crate::model::Hash;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const ARCHIVE_MAGIC: &[u8; 8] = b"SSARCHV1";

/// Writer for an archive file
pub struct Archive {
    path: PathBuf,
    writer: BufWriter<File>,
    count: usize,
}

impl Archive {
    /// Start a new archive at `path`, truncating any existing file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(ARCHIVE_MAGIC)?;
        Ok(Archive {
            path,
            writer,
            count: 0,
        })
    }

    /// Append one stored blob
    pub fn add(&mut self, hash: &Hash, stored: &[u8]) -> Result<()> {
        let len = u32::try_from(stored.len())
            .map_err(|_| Error::InvalidArgument(format!("blob {} too large", hash.short())))?;
        self.writer.write_all(hash.as_bytes())?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(stored)?;
        self.count += 1;
        Ok(())
    }

    /// Append every listed blob from a store
    pub fn add_list(&mut self, store: &ObjectStore, hashes: &[Hash]) -> Result<()> {
        for hash in hashes {
            let stored = store
                .get_stored(hash)
                .map_err(|e| e.context(format!("archive block {}", hash.short())))?;
            self.add(hash, &stored)?;
        }
        Ok(())
    }

    /// Number of blobs written so far
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the archive, returning its path
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }

    /// Read every blob from an archive file
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<(Hash, Vec<u8>)>> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);

        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::InvalidFile("Truncated archive".into()))?;
        if &magic != ARCHIVE_MAGIC {
            return Err(Error::InvalidFile("Invalid archive magic".into()));
        }

        let mut blocks = Vec::new();
        loop {
            let mut hash_buf = [0u8; 32];
            match reader.read_exact(&mut hash_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let mut stored = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            reader.read_exact(&mut stored)?;

            blocks.push((Hash::from_bytes(hash_buf), stored));
        }
        Ok(blocks)
    }
}
