use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{Collection, CollectionName, StorageBackend, StorageError};
use crate::directory::types::{Chatter, Model};
use crate::tickets::types::Ticket;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A typed record kept in one of the store's collections.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
    fn collection(store: &EntityStore) -> &Collection<Self>;
}

/// Caller-supplied fields for a new record. The store assigns id and timestamps.
pub trait Draft: Send {
    type Record: Record;

    fn validate(&self) -> Result<(), StoreError>;
    fn into_record(self, id: Uuid, now: DateTime<Utc>) -> Self::Record;
}

/// Returns a timestamp strictly after `previous`, normally the current time.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Typed CRUD over the model, chatter and ticket collections.
///
/// Every write goes through to the backend before it becomes visible.
#[derive(Debug)]
pub struct EntityStore {
    models: Collection<Model>,
    chatters: Collection<Chatter>,
    tickets: Collection<Ticket>,
}

impl EntityStore {
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StorageError> {
        let models = Collection::load(CollectionName::Models, backend.clone()).await?;
        let chatters = Collection::load(CollectionName::Chatters, backend.clone()).await?;
        let tickets = Collection::load(CollectionName::Tickets, backend).await?;
        Ok(Self {
            models,
            chatters,
            tickets,
        })
    }

    pub(crate) fn models(&self) -> &Collection<Model> {
        &self.models
    }

    pub(crate) fn chatters(&self) -> &Collection<Chatter> {
        &self.chatters
    }

    pub(crate) fn tickets(&self) -> &Collection<Ticket> {
        &self.tickets
    }

    pub async fn create<D: Draft>(&self, draft: D) -> Result<D::Record, StoreError> {
        draft.validate()?;
        let record = draft.into_record(Uuid::new_v4(), Utc::now());
        let created = record.clone();

        <D::Record as Record>::collection(self)
            .mutate(move |records| {
                records.push(record);
                Ok::<_, StoreError>(())
            })
            .await?;

        info!("Created {} {}", <D::Record as Record>::KIND, created.id());
        Ok(created)
    }

    pub async fn read<R: Record>(&self, id: Uuid) -> Result<R, StoreError> {
        R::collection(self)
            .find(|r| r.id() == id)
            .await
            .ok_or(StoreError::NotFound { kind: R::KIND, id })
    }

    /// Merges a partial change into the record and bumps `updated_at`.
    /// Returns the pre-image and post-image.
    pub async fn update<R, F>(&self, id: Uuid, apply: F) -> Result<(R, R), StoreError>
    where
        R: Record,
        F: FnOnce(&mut R) -> Result<(), StoreError>,
    {
        let images = R::collection(self)
            .mutate(move |records| {
                let slot = records
                    .iter_mut()
                    .find(|r| r.id() == id)
                    .ok_or(StoreError::NotFound { kind: R::KIND, id })?;
                let before = slot.clone();
                let mut after = slot.clone();
                apply(&mut after)?;
                after.set_updated_at(next_timestamp(before.updated_at()));
                *slot = after.clone();
                Ok::<_, StoreError>((before, after))
            })
            .await?;

        debug!("Updated {} {}", R::KIND, id);
        Ok(images)
    }

    /// Applies `apply` to every record matching `predicate` in a single write.
    /// Returns the post-images of the touched records.
    pub async fn update_where<R, P, F>(&self, predicate: P, mut apply: F) -> Result<Vec<R>, StoreError>
    where
        R: Record,
        P: Fn(&R) -> bool,
        F: FnMut(&mut R),
    {
        R::collection(self)
            .mutate(move |records| {
                let mut touched = Vec::new();
                for slot in records.iter_mut().filter(|r| predicate(r)) {
                    let previous = slot.updated_at();
                    apply(slot);
                    slot.set_updated_at(next_timestamp(previous));
                    touched.push(slot.clone());
                }
                Ok::<_, StoreError>(touched)
            })
            .await
    }

    /// Snapshot of the records matching `predicate`, filtered lazily.
    pub async fn list<R, P>(&self, predicate: P) -> std::iter::Filter<std::vec::IntoIter<R>, P>
    where
        R: Record,
        P: FnMut(&R) -> bool,
    {
        R::collection(self).snapshot().await.into_iter().filter(predicate)
    }

    /// Drops the record from its active collection.
    pub async fn remove<R: Record>(&self, id: Uuid) -> Result<R, StoreError> {
        let removed = R::collection(self)
            .mutate(move |records| {
                let index = records
                    .iter()
                    .position(|r| r.id() == id)
                    .ok_or(StoreError::NotFound { kind: R::KIND, id })?;
                Ok::<_, StoreError>(records.remove(index))
            })
            .await?;

        info!("Removed {} {}", R::KIND, id);
        Ok(removed)
    }

    /// Reinstalls a previously read image of a record, replacing any current
    /// version with the same id. Used to undo a write that could not be audited.
    pub async fn restore<R: Record>(&self, record: R) -> Result<(), StoreError> {
        let id = record.id();
        R::collection(self)
            .mutate(move |records| {
                match records.iter_mut().find(|r| r.id() == id) {
                    Some(slot) => *slot = record,
                    None => records.push(record),
                }
                Ok::<_, StoreError>(())
            })
            .await?;

        info!("Restored {} {}", R::KIND, id);
        Ok(())
    }
}
