//! Explicit table of connector implementations, built at startup.
//!
//! ```rust,ignore
//! let mut registry = ConnectorRegistry::builtin();
//! registry.register("my-vendor", |config, http| {
//!     Ok(Box::new(MyVendor::new(config, http.clone())?))
//! });
//! ```

use crate::config::ConnectorConfig;
use crate::connector::Connector;
use crate::connectors::{github::GitHub, okta::Okta};
use crate::http::HttpClient;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectorConfig, &HttpClient) -> Result<Box<dyn Connector>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: BTreeMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every connector shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Okta::NAME, |config, http| {
            let connector: Box<dyn Connector> = Box::new(Okta::new(config, http.clone())?);
            Ok(connector)
        });
        registry.register(GitHub::NAME, |config, http| {
            let connector: Box<dyn Connector> = Box::new(GitHub::new(config, http.clone())?);
            Ok(connector)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectorConfig, &HttpClient) -> Result<Box<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiates the connector named by `config.connector`.
    pub fn build(&self, config: &ConnectorConfig, http: &HttpClient) -> Result<Box<dyn Connector>> {
        let factory = self.factories.get(&config.connector).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown connector type '{}' for '{}' (available: {})",
                config.connector,
                config.name,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(config, http)
    }
}
