//! Pointer cache abstraction.
//!
//! A cache maps a [`CacheKey`] (one per connector, identity and operation)
//! to the connector's last fully processed pointer. Keys never collide
//! across connectors, so backends do not need cross-key locking.

mod file;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use file::FileCache;
pub use memory::MemoryCache;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCache;

use crate::config::CacheSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Cache key of the form `{connector}_{identity}[_{operation}]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(connector: &str, identity: &str, operation: Option<&str>) -> Self {
        match operation {
            Some(op) if !op.is_empty() => Self(format!("{}_{}_{}", connector, identity, op)),
            _ => Self(format!("{}_{}", connector, identity)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the stored value, or [`Error::NotFound`] when the key has
    /// never been written.
    async fn get(&self, key: &CacheKey) -> Result<String>;

    async fn set(&self, key: &CacheKey, value: &str) -> Result<()>;

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Builds the cache backend selected in settings.
pub async fn from_settings(settings: &CacheSettings) -> Result<Arc<dyn Cache>> {
    match settings {
        CacheSettings::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheSettings::File { path } => Ok(Arc::new(FileCache::new(path))),
        #[cfg(feature = "postgres")]
        CacheSettings::Postgres { url, table } => {
            Ok(Arc::new(PostgresCache::connect(url, table).await?))
        }
        #[cfg(not(feature = "postgres"))]
        CacheSettings::Postgres { .. } => Err(Error::Configuration(
            "postgres cache requires the 'postgres' feature".to_string(),
        )),
    }
}

pub(crate) fn not_found(key: &CacheKey) -> Error {
    Error::NotFound(format!("no pointer cached for {}", key))
}
