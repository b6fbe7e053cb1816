use super::{Output, Submission};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Writes each batch to `{directory}/{object path}`.
#[derive(Debug, Clone)]
pub struct FileOutput {
    directory: PathBuf,
}

impl FileOutput {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Output for FileOutput {
    async fn submit(&self, data: Bytes, submission: &Submission) -> Result<()> {
        let path = self.directory.join(submission.object_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        debug!(path = ?path, bytes = data.len(), "batch written");
        Ok(())
    }
}
