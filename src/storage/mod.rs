pub mod backend;
pub mod entity_store;

pub use backend::{CollectionName, InMemoryBackend, JsonFileBackend, StorageBackend};
#[cfg(test)]
pub(crate) use backend::FlakyBackend;
pub use entity_store::{next_timestamp, Draft, EntityStore, Record, StoreError};

use log::{error, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bumped whenever the persisted record layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Schema version mismatch in {collection}: found {found}, expected {expected}")]
    SchemaMismatch {
        collection: CollectionName,
        found: u32,
        expected: u32,
    },
    #[error("Collection mismatch: file holds {found}, expected {expected}")]
    WrongCollection {
        expected: CollectionName,
        found: String,
    },
    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema_version: u32,
    collection: &'a str,
    records: &'a [T],
}

#[derive(Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    collection: String,
    records: Vec<T>,
}

/// An in-memory collection mirrored write-through to a [`StorageBackend`].
///
/// Readers always see the last state the backend acknowledged: a mutation is
/// applied to a private copy, persisted, and only then published.
pub struct Collection<T> {
    name: CollectionName,
    records: RwLock<Vec<T>>,
    backend: Arc<dyn StorageBackend>,
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("backend", &"Arc<dyn StorageBackend>")
            .finish()
    }
}

impl<T> Collection<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub async fn load(
        name: CollectionName,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StorageError> {
        let records = match backend.read(name).await? {
            Some(payload) => decode(name, &payload)?,
            None => Vec::new(),
        };
        info!("Loaded {} {} record(s)", records.len(), name);
        Ok(Self {
            name,
            records: RwLock::new(records),
            backend,
        })
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.records.read().await.clone()
    }

    pub async fn find<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.records.read().await.iter().find(|r| predicate(r)).cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Applies `f` to a copy of the records, persists the copy and publishes it.
    /// If `f` or the write fails, the published state is untouched.
    pub async fn mutate<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Vec<T>) -> Result<R, E>,
        E: From<StorageError>,
    {
        let mut guard = self.records.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, records: &[T]) -> Result<(), StorageError> {
        let payload = serde_json::to_string_pretty(&EnvelopeRef {
            schema_version: SCHEMA_VERSION,
            collection: self.name.as_str(),
            records,
        })?;
        self.backend.write(self.name, payload).await.map_err(|e| {
            error!("Failed to persist {}: {e}", self.name);
            e
        })
    }
}

fn decode<T: DeserializeOwned>(name: CollectionName, payload: &str) -> Result<Vec<T>, StorageError> {
    let envelope: Envelope<T> = serde_json::from_str(payload)?;
    if envelope.schema_version != SCHEMA_VERSION {
        return Err(StorageError::SchemaMismatch {
            collection: name,
            found: envelope.schema_version,
            expected: SCHEMA_VERSION,
        });
    }
    if envelope.collection != name.as_str() {
        return Err(StorageError::WrongCollection {
            expected: name,
            found: envelope.collection,
        });
    }
    Ok(envelope.records)
}
