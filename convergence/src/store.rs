//! Artifact store: where repaired content is read from and written back to.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::ArtifactId;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read(&self, id: &ArtifactId) -> Result<String, StoreError>;

    /// Replace the artifact's content. Implementations must never leave a
    /// partially written artifact behind.
    async fn write(&self, id: &ArtifactId, content: &str) -> Result<(), StoreError>;
}

/// In-memory store, used by tests and by callers that stage artifacts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<ArtifactId, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, id: impl Into<ArtifactId>, content: impl Into<String>) -> Self {
        self.insert(id, content);
        self
    }

    pub fn insert(&self, id: impl Into<ArtifactId>, content: impl Into<String>) {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into(), content.into());
    }

    pub fn get(&self, id: &ArtifactId) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<ArtifactId> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn read(&self, id: &ArtifactId) -> Result<String, StoreError> {
        self.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn write(&self, id: &ArtifactId, content: &str) -> Result<(), StoreError> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        match files.get_mut(id) {
            Some(slot) => {
                *slot = content.to_string();
                Ok(())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_replaces_existing_only() {
        let store = MemoryStore::new().with_file("a.cc", "old");
        let a = ArtifactId::new("a.cc");
        store.write(&a, "new").await.unwrap();
        assert_eq!(store.read(&a).await.unwrap(), "new");

        let missing = ArtifactId::new("b.cc");
        assert!(matches!(
            store.write(&missing, "x").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
