//! Resolves secret references in connector configurations.
//!
//! A configuration lists references in its `secrets` map, keyed by the field
//! they fill: `{"secrets": {"key": "OKTA_TOKEN"}}`. Hydration replaces each
//! reference with the resolved value before the connector is built.

use crate::config::{ConnectorConfig, SecretSettings};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::error;

#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Returns the secret value for `reference`.
    async fn resolve(&self, reference: &str) -> Result<String>;

    /// Fills every referenced field of `config`.
    async fn hydrate(&self, mut config: ConnectorConfig) -> Result<ConnectorConfig> {
        let references = std::mem::take(&mut config.secrets);
        for (field, reference) in references {
            let value = self.resolve(&reference).await.map_err(|e| {
                Error::Configuration(format!(
                    "connector '{}' secret for '{}' unavailable: {}",
                    config.name, field, e
                ))
            })?;
            config.set_field(&field, value);
        }
        Ok(config)
    }

    /// Hydrates every configuration, dropping the ones that fail.
    async fn load(&self, configs: Vec<ConnectorConfig>) -> Vec<ConnectorConfig> {
        let mut hydrated = Vec::with_capacity(configs.len());
        for config in configs {
            let name = config.name.clone();
            match self.hydrate(config).await {
                Ok(config) => hydrated.push(config),
                Err(e) => error!(
                    connector = %name,
                    error = %e,
                    "dropping connector with unresolved secrets"
                ),
            }
        }
        hydrated
    }
}

pub fn from_settings(settings: &SecretSettings) -> Box<dyn SecretSource> {
    match settings {
        SecretSettings::Env => Box::new(EnvSecretSource),
    }
}

/// Reads references as environment variable names.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretSource;

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn resolve(&self, reference: &str) -> Result<String> {
        std::env::var(reference)
            .map_err(|e| Error::Configuration(format!("environment variable {}: {}", reference, e)))
    }
}
