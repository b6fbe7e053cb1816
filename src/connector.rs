//! Connector trait definition

use crate::pagination::{paginate, PageSource};
use crate::position::PositionEngine;
use crate::runtime::CollectContext;
use crate::Result;
use async_trait::async_trait;

/// Default backfill window when a connector has no stored pointer.
pub const DEFAULT_BACKFILL_DAYS: i64 = 7;

/// How a connector's records are ordered and deduplicated.
#[derive(Debug, Clone)]
pub struct CollectSpec {
    pub engine: PositionEngine,
    /// Lookback applied on the first run.
    pub backfill: chrono::Duration,
}

impl CollectSpec {
    pub fn new(engine: PositionEngine) -> Self {
        Self {
            engine,
            backfill: chrono::Duration::days(DEFAULT_BACKFILL_DAYS),
        }
    }

    pub fn with_backfill(mut self, backfill: chrono::Duration) -> Self {
        self.backfill = backfill;
        self
    }
}

/// A vendor-specific collection job.
///
/// Connectors are pull-based: the runtime authenticates once, then
/// [`Connector::collect`] drives the connector's [`PageSource`] through the
/// pagination loop, saving each page as it arrives.
#[async_trait]
pub trait Connector: PageSource {
    /// Returns the connector type name (e.g., "okta", "github")
    fn name(&self) -> &'static str;

    fn spec(&self) -> &CollectSpec;

    /// Acquires whatever credential the vendor needs for this run.
    async fn authenticate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Collects everything newer than the context's pointer.
    async fn collect(&mut self, ctx: &mut CollectContext<'_>) -> Result<()> {
        let since = ctx.since().to_string();
        paginate(self, ctx, &since).await?;
        Ok(())
    }
}
