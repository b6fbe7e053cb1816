use super::{not_found, Cache, CacheKey};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local cache. Pointers are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<CacheKey, String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<String> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| crate::Error::Cache("memory cache lock poisoned".to_string()))?;
        entries.get(key).cloned().ok_or_else(|| not_found(key))
    }

    async fn set(&self, key: &CacheKey, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::Error::Cache("memory cache lock poisoned".to_string()))?;
        entries.insert(key.clone(), value.to_string());
        Ok(())
    }
}
