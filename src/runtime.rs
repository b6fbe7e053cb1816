//! Per-connector run lifecycle.
//!
//! A run moves through `unstarted -> authenticated -> collecting -> saving
//! -> done`. Any failure ends the run; the scheduler retries on the next
//! cadence. Failures come back as [`Error::Connector`] carrying the stage
//! the run had reached.

use crate::cache::{self, Cache, CacheKey};
use crate::config::{ConnectorConfig, Settings};
use crate::http::HttpClient;
use crate::output::{self, serializer, Output, Submission};
use crate::pagination::{PageSink, SaveOutcome};
use crate::position::{LogOrder, Pointer, Position, PositionEngine};
use crate::record::LogEntry;
use crate::registry::ConnectorRegistry;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Top level partition for collected records.
const LOG_KIND: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Unstarted,
    Authenticated,
    Collecting,
    Saving,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStage::Unstarted => "unstarted",
            RunStage::Authenticated => "authenticated",
            RunStage::Collecting => "collecting",
            RunStage::Saving => "saving",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        })
    }
}

/// Summary of one successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub name: String,
    pub connector: String,
    pub identity: String,
    pub entries: usize,
    pub pages: usize,
    pub elapsed: Duration,
    /// Pointer persisted at the end of the run.
    pub pointer: String,
    /// No pointer was cached before this run.
    pub first_run: bool,
}

/// Handle a connector's `collect` uses to save pages and read its pointer.
pub struct CollectContext<'a> {
    config: &'a ConnectorConfig,
    engine: PositionEngine,
    cache: &'a dyn Cache,
    output: &'a dyn Output,
    key: CacheKey,
    start: Pointer,
    next: Option<Position>,
    stage: RunStage,
    started_at: DateTime<Utc>,
    part: u32,
    entries: usize,
    pages: usize,
}

impl<'a> CollectContext<'a> {
    pub fn new(
        config: &'a ConnectorConfig,
        engine: PositionEngine,
        cache: &'a dyn Cache,
        output: &'a dyn Output,
        start: Pointer,
    ) -> Self {
        Self {
            config,
            engine,
            cache,
            output,
            key: config.cache_key(),
            start,
            next: None,
            stage: RunStage::Collecting,
            started_at: Utc::now(),
            part: 0,
            entries: 0,
            pages: 0,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        self.config
    }

    pub fn engine(&self) -> &PositionEngine {
        &self.engine
    }

    /// Pointer value at the start of the run; what "since" filters use.
    pub fn since(&self) -> &str {
        self.start.value()
    }

    /// The pointer the run would persist if it finished now.
    pub fn pointer(&self) -> Pointer {
        self.next
            .as_ref()
            .map(|p| p.pointer().clone())
            .unwrap_or_else(|| self.start.clone())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Persists the final pointer. Always writes, so a first run that found
    /// nothing still records its backfill boundary.
    pub async fn commit(&mut self) -> Result<Pointer> {
        self.stage = RunStage::Saving;
        let pointer = self.pointer();
        self.cache.set(&self.key, &pointer.encode()).await?;
        Ok(pointer)
    }

    fn submission(&self) -> Submission {
        Submission {
            connector: self.config.connector.clone(),
            identity: self.config.identity.clone(),
            operation: self.config.operation_label().to_string(),
            part: self.part,
            kind: LOG_KIND.to_string(),
            descriptor: self.started_at.timestamp().to_string(),
            collected_at: self.started_at,
        }
    }
}

#[async_trait]
impl PageSink for CollectContext<'_> {
    async fn save(&mut self, entries: Vec<LogEntry>) -> Result<SaveOutcome> {
        self.pages += 1;
        let filtered = self.engine.filter(&self.start, entries);
        let exhausted = self.engine.is_exhausted(&filtered);
        let advanced = self.engine.advance(self.next.clone(), &filtered);

        if filtered.fresh.is_empty() {
            debug!(
                connector = %self.config.name,
                stale = filtered.stale,
                "page held no new records"
            );
            return Ok(SaveOutcome {
                saved: 0,
                exhausted,
            });
        }

        let operation = self.config.operation_label().to_string();
        let mut records = filtered.fresh;
        for record in &mut records {
            record.annotate(&self.config.connector, &operation);
        }
        let count = records.len();
        let data = serializer::encode(&records)?;

        self.stage = RunStage::Saving;
        self.part += 1;
        let submission = self.submission();
        self.output.submit(data, &submission).await?;
        self.entries += count;

        // Only advance once the page is durably saved.
        self.next = advanced;
        if self.engine.order() == LogOrder::Chronological {
            self.cache.set(&self.key, &self.pointer().encode()).await?;
        }
        self.stage = RunStage::Collecting;

        debug!(
            connector = %self.config.name,
            part = self.part,
            saved = count,
            stale = filtered.stale,
            unpositioned = filtered.unpositioned,
            "page saved"
        );

        Ok(SaveOutcome {
            saved: count,
            exhausted,
        })
    }
}

/// Runs connectors: resolves pointers, drives collection, persists results.
pub struct Runtime {
    cache: Arc<dyn Cache>,
    output: Arc<dyn Output>,
    registry: ConnectorRegistry,
    http: HttpClient,
}

impl Runtime {
    pub fn new(
        cache: Arc<dyn Cache>,
        output: Arc<dyn Output>,
        registry: ConnectorRegistry,
        http: HttpClient,
    ) -> Self {
        Self {
            cache,
            output,
            registry,
            http,
        }
    }

    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            cache::from_settings(&settings.cache).await?,
            output::from_settings(&settings.output)?,
            ConnectorRegistry::builtin(),
            HttpClient::from_settings(&settings.http)?,
        ))
    }

    /// Runs one configured connector to completion.
    pub async fn execute(&self, config: &ConnectorConfig) -> Result<RunReport> {
        let started = Instant::now();
        let mut stage = RunStage::Unstarted;

        match self.run(config, &mut stage, started).await {
            Ok(report) => {
                info!(
                    connector = %report.name,
                    identity = %report.identity,
                    entries = report.entries,
                    pages = report.pages,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    pointer = %report.pointer,
                    first_run = report.first_run,
                    "collection complete"
                );
                Ok(report)
            }
            Err(e) => {
                debug!(
                    connector = %config.name,
                    from = %stage,
                    to = %RunStage::Failed,
                    "run stage changed"
                );
                Err(Error::Connector {
                    name: config.name.clone(),
                    stage,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn run(
        &self,
        config: &ConnectorConfig,
        stage: &mut RunStage,
        started: Instant,
    ) -> Result<RunReport> {
        let mut connector = self.registry.build(config, &self.http)?;

        connector.authenticate().await?;
        transition(config, stage, RunStage::Authenticated);

        let spec = connector.spec().clone();
        let (start, first_run) = self.resolve_pointer(config, &spec.engine, spec.backfill).await?;

        transition(config, stage, RunStage::Collecting);
        let mut ctx = CollectContext::new(
            config,
            spec.engine,
            self.cache.as_ref(),
            self.output.as_ref(),
            start,
        );
        if let Err(e) = connector.collect(&mut ctx).await {
            *stage = ctx.stage;
            return Err(e);
        }

        transition(config, stage, RunStage::Saving);
        let pointer = ctx.commit().await?;
        transition(config, stage, RunStage::Done);

        Ok(RunReport {
            name: config.name.clone(),
            connector: config.connector.clone(),
            identity: config.identity.clone(),
            entries: ctx.entries(),
            pages: ctx.pages(),
            elapsed: started.elapsed(),
            pointer: pointer.encode(),
            first_run,
        })
    }

    async fn resolve_pointer(
        &self,
        config: &ConnectorConfig,
        engine: &PositionEngine,
        backfill: chrono::Duration,
    ) -> Result<(Pointer, bool)> {
        let key = config.cache_key();
        match self.cache.get(&key).await {
            Ok(raw) => {
                debug!(
                    connector = %config.name,
                    key = %key,
                    pointer = %raw,
                    "resuming from pointer"
                );
                Ok((engine.decode_pointer(&raw), false))
            }
            Err(e) if e.is_not_found() => {
                let pointer = engine.default_pointer(Utc::now(), backfill);
                info!(
                    connector = %config.name,
                    key = %key,
                    pointer = %pointer,
                    backfill_days = backfill.num_days(),
                    "no pointer cached, starting from backfill window"
                );
                Ok((pointer, true))
            }
            Err(e) => Err(e),
        }
    }
}

fn transition(config: &ConnectorConfig, stage: &mut RunStage, next: RunStage) {
    debug!(connector = %config.name, from = %*stage, to = %next, "run stage changed");
    *stage = next;
}
