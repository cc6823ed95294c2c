//! Filesystem artifact store rooted at the project root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use convergence::{ArtifactId, ArtifactStore, StoreError};

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

fn io_error(id: &ArtifactId, source: std::io::Error) -> StoreError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(id.clone())
    } else {
        StoreError::Io {
            id: id.clone(),
            source,
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn read(&self, id: &ArtifactId) -> Result<String, StoreError> {
        tokio::fs::read_to_string(self.path_of(id))
            .await
            .map_err(|e| io_error(id, e))
    }

    /// Write to a sibling temp file, then rename over the artifact, so a
    /// reader never observes half-written content.
    async fn write(&self, id: &ArtifactId, content: &str) -> Result<(), StoreError> {
        let target = self.path_of(id);
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let tmp = dir.join(format!(
            ".{}.buildfix-{}.tmp",
            id.file_name(),
            uuid::Uuid::new_v4().simple()
        ));

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_error(id, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(id, e));
        }

        tracing::debug!(artifact = %id, bytes = content.len(), "artifact written");
        Ok(())
    }
}
