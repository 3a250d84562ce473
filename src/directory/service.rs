use log::{error, info};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::error::DirectoryError;
use super::types::{Chatter, Model, NewChatter, NewModel, ResolvedChatter};
use crate::storage::{EntityStore, StoreError};

/// Models and chatters, including the chatter-to-model assignment.
pub struct DirectoryService {
    store: Arc<EntityStore>,
}

impl DirectoryService {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self { store }
    }

    pub async fn create_model(&self, request: NewModel) -> Result<Model, DirectoryError> {
        Ok(self.store.create(request).await?)
    }

    pub async fn get_model(&self, id: Uuid) -> Result<Model, DirectoryError> {
        Ok(self.store.read(id).await?)
    }

    pub async fn list_models(&self) -> Vec<Model> {
        self.store.list::<Model, _>(|_| true).await.collect()
    }

    /// Renames a model and rewrites the denormalized name on every chatter
    /// assigned to it.
    pub async fn rename_model(&self, id: Uuid, name: &str) -> Result<Model, DirectoryError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(DirectoryError::Validation("Model name is required".to_string()));
        }

        let new_name = name.clone();
        let (before, model) = self
            .store
            .update::<Model, _>(id, move |m| {
                m.name = new_name;
                Ok(())
            })
            .await?;

        let touched = match self
            .store
            .update_where::<Chatter, _, _>(
                |c| c.is_assigned_to(id),
                |c| c.rename_model(id, &name),
            )
            .await
        {
            Ok(touched) => touched,
            Err(e) => {
                error!("Failed to propagate rename of model {id}: {e}");
                self.undo(before).await;
                return Err(e.into());
            }
        };

        info!("Renamed model {id}; {} chatter(s) updated", touched.len());
        Ok(model)
    }

    /// Deletes a model and removes it from every chatter's assignment.
    pub async fn delete_model(&self, id: Uuid) -> Result<(), DirectoryError> {
        let removed = self.store.remove::<Model>(id).await?;
        let touched = match self
            .store
            .update_where::<Chatter, _, _>(|c| c.is_assigned_to(id), |c| c.drop_model(id))
            .await
        {
            Ok(touched) => touched,
            Err(e) => {
                error!("Failed to unassign deleted model {id}: {e}");
                self.undo(removed).await;
                return Err(e.into());
            }
        };
        info!("Deleted model {id}; unassigned from {} chatter(s)", touched.len());
        Ok(())
    }

    pub async fn create_chatter(&self, request: NewChatter) -> Result<Chatter, DirectoryError> {
        let models = self.resolve_models(&request.model_ids).await?;
        Ok(self
            .store
            .create(ResolvedChatter {
                name: request.name,
                models,
            })
            .await?)
    }

    pub async fn get_chatter(&self, id: Uuid) -> Result<Chatter, DirectoryError> {
        Ok(self.store.read(id).await?)
    }

    pub async fn list_chatters(&self) -> Vec<Chatter> {
        self.store.list::<Chatter, _>(|_| true).await.collect()
    }

    pub async fn chatters_for_model(&self, model_id: Uuid) -> Vec<Chatter> {
        self.store
            .list::<Chatter, _>(|c| c.is_assigned_to(model_id))
            .await
            .collect()
    }

    /// Replaces the chatter's model assignment.
    pub async fn assign_models(
        &self,
        chatter_id: Uuid,
        model_ids: &[Uuid],
    ) -> Result<Chatter, DirectoryError> {
        let models = self.resolve_models(model_ids).await?;
        let (_, chatter) = self
            .store
            .update::<Chatter, _>(chatter_id, move |c| {
                c.set_assignment(&models);
                Ok(())
            })
            .await?;
        Ok(chatter)
    }

    pub async fn unassign_model(
        &self,
        chatter_id: Uuid,
        model_id: Uuid,
    ) -> Result<Chatter, DirectoryError> {
        let (_, chatter) = self
            .store
            .update::<Chatter, _>(chatter_id, move |c| {
                c.drop_model(model_id);
                Ok(())
            })
            .await?;
        Ok(chatter)
    }

    /// Puts the model back as it was before a write whose chatter side failed.
    async fn undo(&self, model: Model) {
        let id = model.id;
        if let Err(e) = self.store.restore(model).await {
            error!("Failed to restore model {id}; chatters may be out of sync: {e}");
        }
    }

    /// Looks up each id once, in the given order. Unknown ids are a validation
    /// error rather than a missing resource.
    async fn resolve_models(&self, ids: &[Uuid]) -> Result<Vec<Model>, DirectoryError> {
        let mut seen = HashSet::new();
        let mut models = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(*id) {
                continue;
            }
            match self.store.read::<Model>(*id).await {
                Ok(model) => models.push(model),
                Err(StoreError::NotFound { .. }) => {
                    return Err(DirectoryError::Validation(format!("Unknown model {id}")));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(models)
    }
}
