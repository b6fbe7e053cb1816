use crate::cache::CacheKey;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide settings, assembled once at startup and handed to the
/// runtime and scheduler.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub output: OutputSettings,
    pub configs: ConfigSourceSettings,
    pub secrets: Option<SecretSettings>,
    pub scheduler: SchedulerSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CacheSettings {
    Memory,
    File {
        #[serde(default = "default_pointer_dir")]
        path: PathBuf,
    },
    Postgres {
        url: String,
        #[serde(default = "default_pointer_table")]
        table: String,
    },
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings::File {
            path: default_pointer_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum OutputSettings {
    #[default]
    Stdout,
    File {
        #[serde(default = "default_output_dir")]
        directory: PathBuf,
    },
    Kafka {
        /// Comma separated bootstrap servers
        brokers: String,
        topic: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ConfigSourceSettings {
    LocalFile {
        #[serde(default = "default_connector_dir")]
        path: PathBuf,
    },
}

impl Default for ConfigSourceSettings {
    fn default() -> Self {
        ConfigSourceSettings::LocalFile {
            path: default_connector_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SecretSettings {
    Env,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub tick_secs: u64,
    pub refresh_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tick_secs: 1,
            refresh_secs: 300,
        }
    }
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 5,
            backoff_base_ms: 1000,
        }
    }
}

impl Settings {
    /// Loads settings from an optional file, then applies `LOGPULL_*`
    /// environment overrides (`LOGPULL_SCHEDULER__WORKERS=8`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("LOGPULL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            return Err(Error::Configuration(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        if let OutputSettings::Kafka { brokers, topic } = &self.output {
            if brokers.trim().is_empty() || topic.trim().is_empty() {
                return Err(Error::Configuration(
                    "kafka output requires brokers and topic".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One configured collection job.
///
/// `(connector, identity, operation)` identifies the job's pointer; `name`
/// is only a label.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConnectorConfig {
    pub name: String,
    pub connector: String,
    pub identity: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    /// Seconds between runs in daemon mode.
    #[serde(default = "default_frequency")]
    pub frequency: u64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Field name to secret reference, resolved by a secret source.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Vendor specific fields the core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectorConfig {
    pub fn new(
        name: impl Into<String>,
        connector: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            connector: connector.into(),
            identity: identity.into(),
            key: None,
            operation: None,
            frequency: default_frequency(),
            disabled: false,
            base_url: None,
            client_id: None,
            subdomain: None,
            secrets: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_frequency(mut self, frequency: u64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.connector, &self.identity, self.operation.as_deref())
    }

    /// Operation label used in record metadata and object names.
    pub fn operation_label(&self) -> &str {
        self.operation.as_deref().unwrap_or("default")
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency)
    }

    pub fn require_key(&self) -> Result<&str> {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(Error::Configuration(format!(
                "connector '{}' has no key configured",
                self.name
            ))),
        }
    }

    /// Reads an uninterpreted string field, `None` when it is not configured.
    pub fn extra_str(&self, field: &str) -> Result<Option<&str>> {
        match self.extra.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Error::Configuration(format!(
                "connector '{}' field '{}' must be a string, got {}",
                self.name, field, other
            ))),
        }
    }

    /// Sets a field by name, routing known fields to their typed slot.
    pub fn set_field(&mut self, field: &str, value: String) {
        match field {
            "key" => self.key = Some(value),
            "base_url" => self.base_url = Some(value),
            "client_id" => self.client_id = Some(value),
            "subdomain" => self.subdomain = Some(value),
            _ => {
                self.extra.insert(field.to_string(), Value::String(value));
            }
        }
    }
}

fn default_frequency() -> u64 {
    600
}

fn default_workers() -> usize {
    50
}

fn default_pointer_dir() -> PathBuf {
    PathBuf::from("pointers")
}

fn default_pointer_table() -> String {
    "logpull_pointers".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_connector_dir() -> PathBuf {
    PathBuf::from("connectors")
}
