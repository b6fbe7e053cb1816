//! Output sinks for collected records.
//!
//! Every saved page becomes one [`Submission`]: a gzip-compressed batch of
//! newline-delimited JSON records plus the metadata needed to name it.

mod file;
#[cfg(feature = "kafka")]
mod kafka;
mod memory;
pub mod serializer;
mod stdout;

pub use file::FileOutput;
#[cfg(feature = "kafka")]
pub use kafka::KafkaOutput;
pub use memory::MemoryOutput;
pub use stdout::StdoutOutput;

use crate::config::OutputSettings;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

/// Metadata describing one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub connector: String,
    pub identity: String,
    pub operation: String,
    /// Page number within the run, starting at 1.
    pub part: u32,
    /// Top level partition, `logs` for collected records.
    pub kind: String,
    /// Groups the parts of one run; the run's start epoch seconds.
    pub descriptor: String,
    /// Start of the run the batch belongs to.
    pub collected_at: DateTime<Utc>,
}

impl Submission {
    /// `{kind}/{connector}/{identity}/{YYYY}/{MM}/{DD}/{operation}/{descriptor}.{part}.json.gz`
    pub fn object_path(&self) -> String {
        format!(
            "{}/{}/{}/{:04}/{:02}/{:02}/{}/{}.{}.json.gz",
            self.kind,
            path_segment(&self.connector),
            path_segment(&self.identity),
            self.collected_at.year(),
            self.collected_at.month(),
            self.collected_at.day(),
            path_segment(&self.operation),
            self.descriptor,
            self.part
        )
    }
}

fn path_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[async_trait]
pub trait Output: Send + Sync {
    /// Persists one serialized batch. Called once per saved page.
    async fn submit(&self, data: Bytes, submission: &Submission) -> Result<()>;
}

/// Builds the output backend selected in settings.
pub fn from_settings(settings: &OutputSettings) -> Result<Arc<dyn Output>> {
    match settings {
        OutputSettings::Stdout => Ok(Arc::new(StdoutOutput::new())),
        OutputSettings::File { directory } => Ok(Arc::new(FileOutput::new(directory))),
        #[cfg(feature = "kafka")]
        OutputSettings::Kafka { brokers, topic } => {
            Ok(Arc::new(KafkaOutput::new(brokers, topic)?))
        }
        #[cfg(not(feature = "kafka"))]
        OutputSettings::Kafka { .. } => Err(crate::Error::Configuration(
            "kafka output requires the 'kafka' feature".to_string(),
        )),
    }
}
