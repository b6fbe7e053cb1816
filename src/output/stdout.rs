use super::{serializer, Output, Submission};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Writes decompressed records to standard output, one JSON object per line.
pub struct StdoutOutput {
    // Serializes writers so batches from concurrent connectors don't interleave.
    lock: Mutex<()>,
}

impl StdoutOutput {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Output for StdoutOutput {
    async fn submit(&self, data: Bytes, submission: &Submission) -> Result<()> {
        let text = serializer::decompress(&data)?;
        let _guard = self.lock.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        debug!(object = %submission.object_path(), "batch written to stdout");
        Ok(())
    }
}
