//! Page-by-page retrieval loop.
//!
//! The driver asks a [`PageSource`] for pages, hands each page to a
//! [`PageSink`] before requesting the next one, and stops when the cursor
//! runs out or the sink reports that older pages cannot contain new data.
//! Fetch failures are returned as-is; retrying is the vendor client's job.

use crate::record::{LogEntry, Page};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

/// Vendor side of the loop: one call per page.
#[async_trait]
pub trait PageSource: Send {
    /// Cursor for the first request. Most APIs start with none; some use
    /// `"0"` or `"1"`.
    fn initial_cursor(&self) -> Option<String> {
        None
    }

    /// Fetches the page after `cursor` for records since `since`.
    async fn fetch(&mut self, since: &str, cursor: Option<&str>) -> Result<Page>;
}

/// What the sink did with one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub saved: usize,
    /// No older page can contain records newer than the pointer.
    pub exhausted: bool,
}

/// Storage side of the loop.
#[async_trait]
pub trait PageSink: Send {
    async fn save(&mut self, entries: Vec<LogEntry>) -> Result<SaveOutcome>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationSummary {
    pub pages: usize,
    pub saved: usize,
    pub stopped_early: bool,
}

pub async fn paginate<S, K>(source: &mut S, sink: &mut K, since: &str) -> Result<PaginationSummary>
where
    S: PageSource + ?Sized,
    K: PageSink + ?Sized,
{
    let mut summary = PaginationSummary::default();
    let mut cursor = source.initial_cursor();

    loop {
        let page = source.fetch(since, cursor.as_deref()).await?;
        summary.pages += 1;

        let next = page.next_cursor().map(str::to_string);
        let count = page.entries.len();
        let outcome = sink.save(page.entries).await?;
        summary.saved += outcome.saved;

        debug!(
            page = summary.pages,
            received = count,
            saved = outcome.saved,
            has_more = next.is_some(),
            "page processed"
        );

        if outcome.exhausted {
            summary.stopped_early = next.is_some();
            break;
        }
        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(summary)
}
