use async_trait::async_trait;
use log::{debug, error};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::StorageError;

/// Top-level collections persisted by the store. Each one is rewritten
/// wholesale on every mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionName {
    Models,
    Chatters,
    Tickets,
    TicketAudit,
    UploadRedemptions,
}

impl CollectionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Models => "models",
            Self::Chatters => "chatters",
            Self::Tickets => "tickets",
            Self::TicketAudit => "ticket_audit",
            Self::UploadRedemptions => "upload_redemptions",
        }
    }

    pub fn all() -> [CollectionName; 5] {
        [
            Self::Models,
            Self::Chatters,
            Self::Tickets,
            Self::TicketAudit,
            Self::UploadRedemptions,
        ]
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable persistence for serialized collections.
///
/// `write` must only return `Ok` once the payload is durable: the entity store
/// publishes a mutation to readers after the backend acknowledged it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, collection: CollectionName) -> Result<Option<String>, StorageError>;
    async fn write(&self, collection: CollectionName, payload: String) -> Result<(), StorageError>;
}

/// One pretty-printed JSON file per collection under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    root: PathBuf,
}

impl JsonFileBackend {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            error!("Failed to create data directory {}: {e}", root.display());
            StorageError::Io(e)
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, collection: CollectionName) -> PathBuf {
        self.root.join(format!("{}.json", collection.as_str()))
    }
}

#[async_trait]
impl StorageBackend for JsonFileBackend {
    async fn read(&self, collection: CollectionName) -> Result<Option<String>, StorageError> {
        let path = self.path_for(collection);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read {}: {e}", path.display());
                Err(StorageError::Io(e))
            }
        }
    }

    async fn write(&self, collection: CollectionName, payload: String) -> Result<(), StorageError> {
        let path = self.path_for(collection);
        let tmp = self.root.join(format!(".{}.json.tmp", collection.as_str()));

        let file = tokio::fs::File::create(&tmp).await?;
        let mut file = tokio::io::BufWriter::new(file);
        tokio::io::AsyncWriteExt::write_all(&mut file, payload.as_bytes()).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        file.into_inner().sync_all().await?;

        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            error!("Failed to replace {}: {e}", path.display());
            StorageError::Io(e)
        })?;

        debug!("Persisted {} ({} bytes)", collection, payload.len());
        Ok(())
    }
}

/// Process-local backend for tests and throwaway runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    collections: Arc<RwLock<HashMap<CollectionName, String>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raw(&self, collection: CollectionName) -> Option<String> {
        self.collections.read().await.get(&collection).cloned()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn read(&self, collection: CollectionName) -> Result<Option<String>, StorageError> {
        Ok(self.collections.read().await.get(&collection).cloned())
    }

    async fn write(&self, collection: CollectionName, payload: String) -> Result<(), StorageError> {
        self.collections.write().await.insert(collection, payload);
        Ok(())
    }
}

/// In-memory backend whose writes to selected collections can be made to fail.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyBackend {
    inner: InMemoryBackend,
    failing: Arc<std::sync::Mutex<std::collections::HashSet<CollectionName>>>,
}

#[cfg(test)]
impl FlakyBackend {
    pub(crate) fn fail(&self, collection: CollectionName) {
        self.failing.lock().expect("lock").insert(collection);
    }

    pub(crate) fn heal(&self) {
        self.failing.lock().expect("lock").clear();
    }
}

#[cfg(test)]
#[async_trait]
impl StorageBackend for FlakyBackend {
    async fn read(&self, collection: CollectionName) -> Result<Option<String>, StorageError> {
        self.inner.read(collection).await
    }

    async fn write(&self, collection: CollectionName, payload: String) -> Result<(), StorageError> {
        let failing = self.failing.lock().expect("lock").contains(&collection);
        if failing {
            return Err(StorageError::Backend(format!("{collection} unavailable")));
        }
        self.inner.write(collection, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_file_backend_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::open(dir.path()).await.expect("open");

        assert!(backend
            .read(CollectionName::Tickets)
            .await
            .expect("read")
            .is_none());

        backend
            .write(CollectionName::Tickets, "[1,2,3]".to_string())
            .await
            .expect("write");

        let content = backend.read(CollectionName::Tickets).await.expect("read");
        assert_eq!(content.as_deref(), Some("[1,2,3]"));
        assert!(dir.path().join("tickets.json").exists());
        assert!(!dir.path().join(".tickets.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_file_backend_overwrites_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::open(dir.path()).await.expect("open");

        backend
            .write(CollectionName::Models, "first payload".to_string())
            .await
            .expect("write");
        backend
            .write(CollectionName::Models, "second".to_string())
            .await
            .expect("write");

        let content = backend.read(CollectionName::Models).await.expect("read");
        assert_eq!(content.as_deref(), Some("second"));
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(CollectionName::TicketAudit.as_str(), "ticket_audit");
        assert_eq!(CollectionName::all().len(), 5);
        assert_eq!(CollectionName::UploadRedemptions.as_str(), "upload_redemptions");
        assert_eq!(CollectionName::Chatters.to_string(), "chatters");
    }
}
