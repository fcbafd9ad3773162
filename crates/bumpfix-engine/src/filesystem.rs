//! tokio-backed [`FilesystemService`].

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::services::FilesystemService;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFilesystem;

#[async_trait]
impl FilesystemService for TokioFilesystem {
    async fn read(&self, path: &Path) -> Result<String, EngineError> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, path: &Path, content: &str) -> Result<(), EngineError> {
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
