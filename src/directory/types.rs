use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{Collection, Draft, EntityStore, Record, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An agent working tickets on behalf of one or more models.
///
/// `model_ids` and `model_names` are parallel lists: index `i` of both always
/// describes the same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chatter {
    pub id: Uuid,
    pub name: String,
    pub model_ids: Vec<Uuid>,
    pub model_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chatter {
    pub fn is_assigned_to(&self, model_id: Uuid) -> bool {
        self.model_ids.contains(&model_id)
    }

    /// Replaces the assignment, keeping both lists aligned.
    pub(crate) fn set_assignment(&mut self, models: &[Model]) {
        self.model_ids = models.iter().map(|m| m.id).collect();
        self.model_names = models.iter().map(|m| m.name.clone()).collect();
    }

    pub(crate) fn rename_model(&mut self, model_id: Uuid, name: &str) {
        for (id, slot) in self.model_ids.iter().zip(self.model_names.iter_mut()) {
            if *id == model_id {
                *slot = name.to_string();
            }
        }
    }

    pub(crate) fn drop_model(&mut self, model_id: Uuid) {
        if let Some(index) = self.model_ids.iter().position(|id| *id == model_id) {
            self.model_ids.remove(index);
            self.model_names.remove(index);
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewModel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChatter {
    pub name: String,
    #[serde(default)]
    pub model_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameModelRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignModelsRequest {
    pub model_ids: Vec<Uuid>,
}

fn require_name(kind: &str, name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation(format!("{kind} name is required")));
    }
    Ok(())
}

impl Record for Model {
    const KIND: &'static str = "model";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn collection(store: &EntityStore) -> &Collection<Self> {
        store.models()
    }
}

impl Record for Chatter {
    const KIND: &'static str = "chatter";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn collection(store: &EntityStore) -> &Collection<Self> {
        store.chatters()
    }
}

impl Draft for NewModel {
    type Record = Model;

    fn validate(&self) -> Result<(), StoreError> {
        require_name("Model", &self.name)
    }

    fn into_record(self, id: Uuid, now: DateTime<Utc>) -> Model {
        Model {
            id,
            name: self.name.trim().to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A chatter draft with its model assignment already resolved to names.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedChatter {
    pub name: String,
    pub models: Vec<Model>,
}

impl Draft for ResolvedChatter {
    type Record = Chatter;

    fn validate(&self) -> Result<(), StoreError> {
        require_name("Chatter", &self.name)
    }

    fn into_record(self, id: Uuid, now: DateTime<Utc>) -> Chatter {
        let mut chatter = Chatter {
            id,
            name: self.name.trim().to_string(),
            model_ids: Vec::new(),
            model_names: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        chatter.set_assignment(&self.models);
        chatter
    }
}
