//! Cloud transport
//!
//! The cloud keeps, per share, the uploaded blocks and the hash of the latest
//! snapshot list ("head"). Shares are addressed by the keyed hash of their
//! name so the service never learns it.

use crate::model::Hash;
use crate::store::{Archive, Blob, ContentStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// What the cloud knows about a share
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteShare {
    pub name_hmac: String,
    /// Latest uploaded snapshot list, `None` before the first upload
    pub head: Option<Hash>,
}

/// Operations the sync engine needs from the cloud side
///
/// `get_share` and `fetch_block` return [`Error::NotFound`] for unknown
/// shares and blocks so callers can tell absence from failure.
pub trait CloudTransport: Send + Sync {
    fn get_share(&self, name_hmac: &str) -> Result<RemoteShare>;

    fn create_share(&self, name_hmac: &str) -> Result<RemoteShare>;

    /// Upload an archive of blocks and move the share head to `head`
    fn send_blocks(&self, name_hmac: &str, archive: &Path, head: &Hash) -> Result<()>;

    /// Stored bytes of one block
    fn fetch_block(&self, name_hmac: &str, hash: &Hash) -> Result<Vec<u8>>;
}

/// Read-only content store over one cloud share
pub struct CloudStore {
    transport: Arc<dyn CloudTransport>,
    name_hmac: String,
}

impl CloudStore {
    pub fn new(transport: Arc<dyn CloudTransport>, name_hmac: impl Into<String>) -> Self {
        CloudStore {
            transport,
            name_hmac: name_hmac.into(),
        }
    }
}

impl ContentStore for CloudStore {
    fn get(&self, hash: &Hash) -> Result<Blob> {
        let stored = self.transport.fetch_block(&self.name_hmac, hash)?;
        Blob::decompress_verified(hash, &stored)
    }

    fn put(&self, blob: &Blob) -> Result<Hash> {
        Err(Error::Unsupported(format!(
            "cloud store is read-only (blob {})",
            blob.hash().short()
        )))
    }

    fn contains(&self, _hash: &Hash) -> bool {
        false
    }
}

#[derive(Default)]
struct MemoryShare {
    head: Option<Hash>,
    blocks: HashMap<Hash, Vec<u8>>,
}

/// In-process cloud, for tests and local experiments
#[derive(Default)]
pub struct MemoryCloud {
    shares: Mutex<HashMap<String, MemoryShare>>,
    uploads: Mutex<usize>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `send_blocks` calls
    pub fn upload_count(&self) -> usize {
        *self.uploads.lock()
    }

    /// Number of blocks held for a share
    pub fn block_count(&self, name_hmac: &str) -> usize {
        self.shares
            .lock()
            .get(name_hmac)
            .map_or(0, |s| s.blocks.len())
    }
}

fn unknown_share(name_hmac: &str) -> Error {
    Error::NotFound(format!("share {}", name_hmac))
}

impl CloudTransport for MemoryCloud {
    fn get_share(&self, name_hmac: &str) -> Result<RemoteShare> {
        let shares = self.shares.lock();
        let share = shares
            .get(name_hmac)
            .ok_or_else(|| unknown_share(name_hmac))?;
        Ok(RemoteShare {
            name_hmac: name_hmac.to_string(),
            head: share.head,
        })
    }

    fn create_share(&self, name_hmac: &str) -> Result<RemoteShare> {
        let mut shares = self.shares.lock();
        let share = shares.entry(name_hmac.to_string()).or_default();
        Ok(RemoteShare {
            name_hmac: name_hmac.to_string(),
            head: share.head,
        })
    }

    fn send_blocks(&self, name_hmac: &str, archive: &Path, head: &Hash) -> Result<()> {
        let blocks = Archive::read(archive)?;

        let mut shares = self.shares.lock();
        let share = shares
            .get_mut(name_hmac)
            .ok_or_else(|| unknown_share(name_hmac))?;
        for (hash, stored) in blocks {
            Blob::decompress_verified(&hash, &stored)?;
            share.blocks.insert(hash, stored);
        }
        if !share.blocks.contains_key(head) {
            return Err(Error::Remote(format!(
                "head {} was never uploaded",
                head.short()
            )));
        }
        share.head = Some(*head);

        *self.uploads.lock() += 1;
        Ok(())
    }

    fn fetch_block(&self, name_hmac: &str, hash: &Hash) -> Result<Vec<u8>> {
        let shares = self.shares.lock();
        let share = shares
            .get(name_hmac)
            .ok_or_else(|| unknown_share(name_hmac))?;
        share
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block {}", hash.short())))
    }
}

/// HTTP client for the sync service
#[cfg(feature = "sync")]
pub struct HttpCloud {
    api_url: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "sync")]
#[derive(serde::Deserialize)]
struct ShareResponse {
    head: Option<String>,
}

#[cfg(feature = "sync")]
impl HttpCloud {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(HttpCloud {
            api_url: api_url.into(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    fn send(
        &self,
        builder: reqwest::blocking::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::blocking::Response> {
        let builder = match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        };
        let response = builder.send().map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(Error::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(Error::Http(format!("{} failed: {} - {}", what, status, text)));
        }
        Ok(response)
    }

    fn share_from(name_hmac: &str, response: reqwest::blocking::Response) -> Result<RemoteShare> {
        let data: ShareResponse = response.json().map_err(|e| Error::Http(e.to_string()))?;
        let head = data
            .head
            .map(|h| Hash::from_hex(&h))
            .transpose()
            .map_err(|e| Error::InvalidHash(e.to_string()))?;
        Ok(RemoteShare {
            name_hmac: name_hmac.to_string(),
            head,
        })
    }
}

#[cfg(feature = "sync")]
impl CloudTransport for HttpCloud {
    fn get_share(&self, name_hmac: &str) -> Result<RemoteShare> {
        let url = self.url(&format!("/shares/{}", name_hmac));
        let response = self.send(self.client.get(&url), &format!("share {}", name_hmac))?;
        Self::share_from(name_hmac, response)
    }

    fn create_share(&self, name_hmac: &str) -> Result<RemoteShare> {
        let url = self.url(&format!("/shares/{}", name_hmac));
        let response = self.send(self.client.post(&url), &format!("create share {}", name_hmac))?;
        Self::share_from(name_hmac, response)
    }

    fn send_blocks(&self, name_hmac: &str, archive: &Path, head: &Hash) -> Result<()> {
        let url = self.url(&format!("/shares/{}/blocks", name_hmac));
        let body = std::fs::read(archive)?;
        let request = self
            .client
            .post(&url)
            .query(&[("head", head.to_hex())])
            .header("Content-Type", "application/octet-stream")
            .body(body);
        self.send(request, &format!("upload to share {}", name_hmac))?;
        Ok(())
    }

    fn fetch_block(&self, name_hmac: &str, hash: &Hash) -> Result<Vec<u8>> {
        let url = self.url(&format!("/shares/{}/blocks/{}", name_hmac, hash.to_hex()));
        let response = self.send(self.client.get(&url), &format!("block {}", hash.short()))?;
        let bytes = response.bytes().map_err(|e| Error::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
