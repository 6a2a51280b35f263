//! Storage seam used by the orchestrator for directory preparation and
//! work discovery.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// The storage operations the orchestrator performs itself. Geometry files
/// are read and written by the engine and converter, not through this trait.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a directory and any missing parents.
    async fn create_dir_all(&self, dir: &Path) -> Result<()>;

    /// Non-directory entries of `dir`, sorted by path.
    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    async fn exists(&self, path: &Path) -> Result<bool>;
}

/// Local filesystem storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

#[async_trait]
impl Storage for LocalStorage {
    async fn create_dir_all(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::filesystem(dir, e))
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PipelineError::filesystem(dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::filesystem(dir, e))?
        {
            let path = entry.path();
            // Follows symlinks, so a linked file counts and a linked directory does not
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|e| PipelineError::filesystem(&path, e))?;
            if !metadata.is_dir() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| PipelineError::filesystem(path, e))
    }
}
