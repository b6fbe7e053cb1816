//! Error types and result handling for logpull.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use logpull::{Error, Result};
//!
//! fn load_token() -> Result<String> {
//!     Err(Error::Configuration("missing key".to_string()))
//! }
//!
//! match load_token() {
//!     Ok(token) => println!("token: {}", token),
//!     Err(Error::Configuration(msg)) => eprintln!("Configuration error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use crate::runtime::RunStage;
use thiserror::Error;

/// The main error type for logpull operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration or credentials are missing or contradictory.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Startup settings could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// Any HTTP or transport failure that is not a recoverable rate limit.
    ///
    /// Rate limits that outlast the retry budget also end up here with
    /// status 429.
    #[error("Request failed{}: {message}", status_suffix(.status))]
    RequestFailed {
        /// HTTP status, when the failure came from a response
        status: Option<u16>,
        /// Operator-facing detail, including a truncated response body
        message: String,
    },

    /// No value is stored for the requested key.
    ///
    /// Not really an error: the runtime uses it to trigger the backfill
    /// window on a connector's first run.
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization error when encoding records or pointers.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from file cache or file output operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An output backend refused a submission.
    #[error("Output error: {0}")]
    Output(String),

    /// A cache backend failed to read or write.
    #[error("Cache error: {0}")]
    Cache(String),

    /// PostgreSQL client error from the pointer cache.
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Kafka producer error from the Kafka output.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// A connector run failed; wraps the underlying cause with the stage
    /// the run had reached.
    #[error("connector '{name}' failed while {stage}: {source}")]
    Connector {
        /// Configured instance name
        name: String,
        /// Last stage the run entered before failing
        stage: RunStage,
        /// Underlying cause
        source: Box<Error>,
    },
}

impl Error {
    /// Returns true for the cache-miss sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub(crate) fn request(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::RequestFailed {
            status,
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// A convenient Result type alias for logpull operations.
///
/// This is equivalent to `std::result::Result<T, logpull::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
