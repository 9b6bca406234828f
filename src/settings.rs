//! Process-wide settings, read from the environment

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Debounce delay between the last local change and an upload
pub const DEFAULT_UPLOAD_DELAY_MS: u64 = 5000;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Cloud endpoint; `None` disables uploads
    pub api_url: Option<String>,
    /// Bearer token for the cloud endpoint
    pub api_token: Option<String>,
    pub upload_delay: Duration,
    /// Holds `shares/<name>.json`
    pub config_dir: PathBuf,
    /// Holds per-share object stores
    pub cache_dir: PathBuf,
}

impl Settings {
    /// Settings from `SHARESYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let upload_delay = match var("SHARESYNC_UPLOAD_DELAY_MS") {
            Some(ms) => ms.parse::<u64>().map_err(|e| {
                Error::Config(format!("SHARESYNC_UPLOAD_DELAY_MS={:?}: {}", ms, e))
            })?,
            None => DEFAULT_UPLOAD_DELAY_MS,
        };

        let config_dir = match var("SHARESYNC_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not find config directory".into()))?
                .join("sharesync"),
        };
        let cache_dir = match var("SHARESYNC_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .ok_or_else(|| Error::Config("Could not find cache directory".into()))?
                .join("sharesync"),
        };

        Ok(Settings {
            api_url: var("SHARESYNC_API_URL").filter(|s| !s.is_empty()),
            api_token: var("SHARESYNC_API_TOKEN").filter(|s| !s.is_empty()),
            upload_delay: Duration::from_millis(upload_delay),
            config_dir,
            cache_dir,
        })
    }

    /// Directory of the object store for a share
    pub fn share_data_dir(&self, name: &str) -> PathBuf {
        self.cache_dir.join("shares").join(name)
    }
}
