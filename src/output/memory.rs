use super::{serializer, Output, Submission};
use crate::record::LogEntry;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;

/// Keeps every submission in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    submissions: Mutex<Vec<(Submission, Bytes)>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .map(|s| s.iter().map(|(submission, _)| submission.clone()).collect())
            .unwrap_or_default()
    }

    /// Decodes every submitted record, in submission order.
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        let submissions = self
            .submissions
            .lock()
            .map_err(|_| Error::Output("memory output lock poisoned".to_string()))?;
        let mut entries = Vec::new();
        for (_, data) in submissions.iter() {
            entries.extend(serializer::decode(data)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl Output for MemoryOutput {
    async fn submit(&self, data: Bytes, submission: &Submission) -> Result<()> {
        self.submissions
            .lock()
            .map_err(|_| Error::Output("memory output lock poisoned".to_string()))?
            .push((submission.clone(), data));
        Ok(())
    }
}
