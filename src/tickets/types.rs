use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::storage::{Collection, Draft, EntityStore, Record, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Deleted,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Deleted => "deleted",
        }
    }

    /// Open tickets can still be worked on; everything else is final.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::InProgress) => true,
            (Self::Pending | Self::InProgress, Self::Completed) => true,
            (Self::Pending | Self::InProgress, Self::Cancelled) => true,
            (Self::Pending | Self::InProgress, Self::Deleted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

pub const DEFAULT_TICKET_TYPE: &str = "custom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub code: String,
    pub model_id: Option<Uuid>,
    pub model_name: Option<String>,
    /// The originating chatter, the only non-admin allowed to mutate the ticket.
    pub chatter_id: Option<Uuid>,
    pub chatter_name: Option<String>,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub status: TicketStatus,
    pub price: f64,
    pub title: String,
    pub description: String,
    pub priority: TicketPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.deadline.is_some_and(|d| d < now)
    }
}

impl Record for Ticket {
    const KIND: &'static str = "ticket";

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
        store.tickets()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTicketRequest {
    #[serde(default)]
    pub title: String,
    pub price: Option<f64>,
    pub model_id: Option<Uuid>,
    pub chatter_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    pub deadline: Option<DateTime<Utc>>,
    /// Label recorded as `changed_by` on the creation entry.
    pub created_by: Option<String>,
}

impl CreateTicketRequest {
    pub fn new(title: &str, price: f64) -> Self {
        Self {
            title: title.to_string(),
            price: Some(price),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        match self.price {
            None => return Err("price is required".to_string()),
            Some(price) => validate_price(price)?,
        }
        if let Some(ticket_type) = &self.ticket_type {
            if ticket_type.trim().is_empty() {
                return Err("type must not be blank".to_string());
            }
        }
        Ok(())
    }
}

fn validate_price(price: f64) -> Result<(), String> {
    if !price.is_finite() || price < 0.0 {
        return Err(format!("price must be a non-negative number, got {price}"));
    }
    Ok(())
}

/// Partial update of a ticket's business fields. Status, references and
/// bookkeeping fields are not patchable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub priority: Option<TicketPriority>,
    pub price: Option<f64>,
    /// `null` clears the deadline, absence leaves it untouched.
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
}

impl UpdateTicketRequest {
    pub fn price(price: f64) -> Self {
        Self {
            price: Some(price),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err("title must not be blank".to_string());
            }
        }
        if let Some(ticket_type) = &self.ticket_type {
            if ticket_type.trim().is_empty() {
                return Err("type must not be blank".to_string());
            }
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        Ok(())
    }

    pub fn apply(self, ticket: &mut Ticket) {
        if let Some(title) = self.title {
            ticket.title = title.trim().to_string();
        }
        if let Some(description) = self.description {
            ticket.description = description;
        }
        if let Some(ticket_type) = self.ticket_type {
            ticket.ticket_type = ticket_type.trim().to_string();
        }
        if let Some(priority) = self.priority {
            ticket.priority = priority;
        }
        if let Some(price) = self.price {
            ticket.price = price;
        }
        if let Some(deadline) = self.deadline {
            ticket.deadline = deadline;
        }
    }
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub chatter_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if self.status.is_some_and(|s| s != ticket.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != ticket.priority) {
            return false;
        }
        if self.chatter_id.is_some() && self.chatter_id != ticket.chatter_id {
            return false;
        }
        if self.model_id.is_some() && self.model_id != ticket.model_id {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            return ticket.title.to_lowercase().contains(&needle)
                || ticket.description.to_lowercase().contains(&needle)
                || ticket.code.to_lowercase().contains(&needle);
        }
        true
    }
}

/// A validated create request with its references resolved.
#[derive(Debug, Clone)]
pub(crate) struct TicketDraft {
    pub request: CreateTicketRequest,
    pub code: String,
    pub model_name: Option<String>,
    pub chatter_name: Option<String>,
}

impl Draft for TicketDraft {
    type Record = Ticket;

    fn validate(&self) -> Result<(), StoreError> {
        self.request.validate().map_err(StoreError::Validation)
    }

    fn into_record(self, id: Uuid, now: DateTime<Utc>) -> Ticket {
        let request = self.request;
        Ticket {
            id,
            code: self.code,
            model_id: request.model_id,
            model_name: self.model_name,
            chatter_id: request.chatter_id,
            chatter_name: self.chatter_name,
            ticket_type: request
                .ticket_type
                .map(|t| t.trim().to_string())
                .unwrap_or_else(|| DEFAULT_TICKET_TYPE.to_string()),
            status: TicketStatus::Pending,
            price: request.price.unwrap_or_default(),
            title: request.title.trim().to_string(),
            description: request.description.unwrap_or_default(),
            priority: request.priority.unwrap_or_default(),
            deadline: request.deadline,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketStats {
    pub total_tickets: usize,
    pub pending_tickets: usize,
    pub in_progress_tickets: usize,
    pub completed_tickets: usize,
    pub cancelled_tickets: usize,
    pub overdue_tickets: usize,
    pub open_value: f64,
}
