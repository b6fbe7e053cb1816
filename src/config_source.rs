//! Where connector configurations come from.

use crate::config::{ConfigSourceSettings, ConnectorConfig};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Supplies the full set of connector configurations.
///
/// The daemon calls [`ConfigSource::get`] again on every refresh, so
/// implementations must re-read their backing store each time.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get(&self) -> Result<Vec<ConnectorConfig>>;
}

pub fn from_settings(settings: &ConfigSourceSettings) -> Box<dyn ConfigSource> {
    match settings {
        ConfigSourceSettings::LocalFile { path } => Box::new(LocalFileConfigSource::new(path)),
    }
}

/// Reads one JSON document per connector from `*.json` files in a directory.
///
/// Files are read in name order. Unreadable or malformed files are logged and
/// skipped so one bad file does not stop every other connector.
pub struct LocalFileConfigSource {
    dir: PathBuf,
}

impl LocalFileConfigSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    async fn read_one(path: &Path) -> Result<ConnectorConfig> {
        let data = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl ConfigSource for LocalFileConfigSource {
    async fn get(&self) -> Result<Vec<ConnectorConfig>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut configs = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::read_one(&path).await {
                Ok(config) => {
                    if !seen.insert(config.name.clone()) {
                        warn!(
                            name = %config.name,
                            path = %path.display(),
                            "duplicate connector name"
                        );
                    }
                    configs.push(config);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable connector configuration"
                    );
                }
            }
        }

        debug!(dir = %self.dir.display(), count = configs.len(), "loaded connector configurations");
        Ok(configs)
    }
}

/// Fixed, in-process configuration set.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    configs: Vec<ConnectorConfig>,
}

impl StaticConfigSource {
    pub fn new(configs: Vec<ConnectorConfig>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get(&self) -> Result<Vec<ConnectorConfig>> {
        Ok(self.configs.clone())
    }
}
