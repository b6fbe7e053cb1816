//! File-backed pointer cache.
//!
//! Each key is persisted as its own small JSON document inside a directory,
//! so concurrent connectors never write the same file.
//!
//! # Example
//!
//! ```rust,no_run
//! use logpull::cache::{Cache, CacheKey, FileCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = FileCache::new("/var/lib/logpull/pointers");
//!     let key = CacheKey::new("okta", "example.okta.com", None);
//!
//!     cache.set(&key, "2024-05-01T12:00:00.000Z").await?;
//!     println!("Resuming from {}", cache.get(&key).await?);
//!     Ok(())
//! }
//! ```

use super::{not_found, Cache, CacheKey};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// On-disk representation of one cached pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerRecord {
    /// The cache key this record belongs to
    pub key: String,
    /// The last fully processed pointer value
    pub pointer: String,
    /// When this record was written
    pub updated_at: DateTime<Utc>,
}

/// Stores pointers as `{directory}/{encoded key}.json`.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// target, so a crash mid-write never leaves a truncated pointer behind.
#[derive(Debug, Clone)]
pub struct FileCache {
    directory: PathBuf,
}

impl FileCache {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// File name for a key. Every byte outside `[A-Za-z0-9.-]` is
    /// percent-encoded, `_` and `%` included, so distinct keys never share a
    /// file.
    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let mut file_name = String::with_capacity(key.as_str().len());
        for byte in key.as_str().bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-') {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("%{:02X}", byte));
            }
        }
        self.directory.join(format!("{}.json", file_name))
    }

    /// Loads the full record for a key, including its write time.
    pub async fn load(&self, key: &CacheKey) -> Result<Option<PointerRecord>> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "no pointer file at {:?}", path);
                return Ok(None);
            }
            Err(e) => {
                error!(key = %key, "failed to read pointer file: {}", e);
                return Err(Error::Io(e));
            }
        };

        match serde_json::from_str::<PointerRecord>(&content) {
            Ok(record) if record.key == key.as_str() => Ok(Some(record)),
            Ok(record) => {
                error!(key = %key, stored = %record.key, "pointer file belongs to another key");
                Err(Error::Cache(format!(
                    "pointer file {:?} holds key '{}', expected '{}'",
                    path, record.key, key
                )))
            }
            Err(e) => {
                error!(key = %key, "failed to parse pointer file: {}", e);
                Err(Error::Cache(format!("invalid pointer file {:?}: {}", path, e)))
            }
        }
    }

    /// Removes the pointer for a key so the next run backfills again.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn get(&self, key: &CacheKey) -> Result<String> {
        match self.load(key).await? {
            Some(record) => Ok(record.pointer),
            None => Err(not_found(key)),
        }
    }

    async fn set(&self, key: &CacheKey, value: &str) -> Result<()> {
        fs::create_dir_all(&self.directory).await?;

        let record = PointerRecord {
            key: key.to_string(),
            pointer: value.to_string(),
            updated_at: Utc::now(),
        };
        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(&record)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &path).await?;

        debug!(key = %key, pointer = %value, "pointer saved");
        Ok(())
    }
}
