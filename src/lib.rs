//! Pointer-based incremental collection of audit logs from third-party APIs.
//!
//! Each configured connector remembers how far it has read (its pointer) in a
//! [`cache::Cache`], pages through the vendor API for newer records, drops
//! anything at or before the pointer, and hands fresh records to an
//! [`output::Output`]. The [`scheduler`] runs many connectors at once, either
//! as a one-shot batch or as a daemon.

pub mod cache;
pub mod config;
pub mod config_source;
pub mod connector;
pub mod connectors;
pub mod error;
pub mod http;
pub mod output;
pub mod pagination;
pub mod position;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod secrets;

pub use crate::config::{ConnectorConfig, Settings};
pub use crate::connector::{CollectSpec, Connector};
pub use crate::error::{Error, Result};
pub use crate::runtime::{RunReport, Runtime};
