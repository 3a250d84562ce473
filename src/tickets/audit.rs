use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::{Collection, CollectionName, StorageBackend, StorageError};

/// Partial field map: field name to JSON value.
pub type FieldMap = serde_json::Map<String, Value>;

/// Fields maintained by the store itself. They change on every write and are
/// never part of a diff.
const BOOKKEEPING_FIELDS: &[&str] = &["updated_at"];

/// Largest page `query_all` returns, whatever the filter asks for.
pub const MAX_AUDIT_PAGE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Completed,
    StatusChanged,
    Deleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Completed => "completed",
            Self::StatusChanged => "status_changed",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub ticket_id: Uuid,
    /// 1-based position in the ticket's history.
    pub sequence: u64,
    pub action: AuditAction,
    pub old_values: FieldMap,
    pub new_values: FieldMap,
    pub changed_by: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditFilter {
    pub ticket_id: Option<Uuid>,
    pub changed_by: Option<String>,
    pub action: Option<AuditAction>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            ticket_id: None,
            changed_by: None,
            action: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_changed_by(mut self, changed_by: &str) -> Self {
        self.changed_by = Some(changed_by.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        if self.ticket_id.is_some_and(|id| id != entry.ticket_id) {
            return false;
        }
        if self.action.is_some_and(|a| a != entry.action) {
            return false;
        }
        if let Some(changed_by) = &self.changed_by {
            if &entry.changed_by != changed_by {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total_count: usize,
    pub has_more: bool,
}

/// Full field map of `value`, used for creation and deletion entries.
pub fn snapshot<T: Serialize>(value: &T) -> Result<FieldMap, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => {
            let mut map = FieldMap::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

/// Field-level diff of two images. Only keys whose value changed appear, in
/// both maps; bookkeeping fields are ignored.
pub fn diff<T: Serialize>(before: &T, after: &T) -> Result<(FieldMap, FieldMap), serde_json::Error> {
    let before = snapshot(before)?;
    let mut after = snapshot(after)?;

    let mut old_values = FieldMap::new();
    let mut new_values = FieldMap::new();

    for (key, old) in before {
        if BOOKKEEPING_FIELDS.contains(&key.as_str()) {
            after.remove(&key);
            continue;
        }
        let new = after.remove(&key).unwrap_or(Value::Null);
        if new != old {
            old_values.insert(key.clone(), old);
            new_values.insert(key, new);
        }
    }
    for (key, new) in after {
        if BOOKKEEPING_FIELDS.contains(&key.as_str()) || new.is_null() {
            continue;
        }
        old_values.insert(key.clone(), Value::Null);
        new_values.insert(key, new);
    }

    Ok((old_values, new_values))
}

/// Append-only ticket history, persisted as the `ticket_audit` collection.
#[derive(Debug)]
pub struct AuditRecorder {
    entries: Collection<AuditEntry>,
}

impl AuditRecorder {
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StorageError> {
        Ok(Self {
            entries: Collection::load(CollectionName::TicketAudit, backend).await?,
        })
    }

    /// Appends one entry. Its sequence follows the ticket's last entry and its
    /// timestamp is never earlier than that entry's.
    pub async fn record(
        &self,
        ticket_id: Uuid,
        action: AuditAction,
        old_values: FieldMap,
        new_values: FieldMap,
        changed_by: &str,
        details: &str,
    ) -> Result<AuditEntry, StorageError> {
        let changed_by = changed_by.to_string();
        let details = details.to_string();

        let entry = self
            .entries
            .mutate(move |entries| {
                let last = entries
                    .iter()
                    .filter(|e| e.ticket_id == ticket_id)
                    .max_by_key(|e| e.sequence);

                let now = Utc::now();
                let (sequence, timestamp) = match last {
                    Some(prev) => (prev.sequence + 1, now.max(prev.timestamp)),
                    None => (1, now),
                };

                let entry = AuditEntry {
                    id: Uuid::new_v4(),
                    ticket_id,
                    sequence,
                    action,
                    old_values,
                    new_values,
                    changed_by,
                    timestamp,
                    details,
                };
                entries.push(entry.clone());
                Ok::<_, StorageError>(entry)
            })
            .await?;

        debug!(
            "Audit #{} for ticket {}: {} by {}",
            entry.sequence, entry.ticket_id, entry.action, entry.changed_by
        );
        Ok(entry)
    }

    /// History of one ticket, oldest first.
    pub async fn query(&self, ticket_id: Uuid) -> Vec<AuditEntry> {
        let mut history: Vec<AuditEntry> = self
            .entries
            .snapshot()
            .await
            .into_iter()
            .filter(|e| e.ticket_id == ticket_id)
            .collect();
        history.sort_by_key(|e| e.sequence);
        history
    }

    /// Entries across tickets, newest first, paged.
    pub async fn query_all(&self, filter: &AuditFilter) -> AuditPage {
        let mut matching: Vec<AuditEntry> = self
            .entries
            .snapshot()
            .await
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        matching.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });

        let limit = filter.limit.min(MAX_AUDIT_PAGE);
        let total_count = matching.len();
        let has_more = filter.offset.saturating_add(limit) < total_count;
        let entries = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect();

        AuditPage {
            entries,
            total_count,
            has_more,
        }
    }

    pub async fn count(&self, action: AuditAction) -> usize {
        self.entries
            .snapshot()
            .await
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}
