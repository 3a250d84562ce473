use axum::{http::StatusCode, response::IntoResponse, Json};
use uuid::Uuid;

use super::types::TicketStatus;
use super::upload::UploadTokenError;
use crate::storage::{StorageError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Ticket {0} not found")]
    NotFound(Uuid),
    #[error("Permission denied")]
    PermissionDenied,
    /// `to` is `None` when the rejected call was an in-place update.
    #[error("{}", transition_message(*from, *to))]
    InvalidTransition {
        from: TicketStatus,
        to: Option<TicketStatus>,
    },
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("Upload token rejected: {0}")]
    Upload(#[from] UploadTokenError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

fn transition_message(from: TicketStatus, to: Option<TicketStatus>) -> String {
    match to {
        Some(to) => format!("Cannot move ticket from {from} to {to}"),
        None => format!("Cannot update a {from} ticket"),
    }
}

impl From<StoreError> for TicketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::NotFound { id, .. } => Self::NotFound(id),
            StoreError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<serde_json::Error> for TicketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err))
    }
}

impl IntoResponse for TicketError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Upload(UploadTokenError::AlreadyRedeemed) => StatusCode::CONFLICT,
            Self::Upload(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_messages() {
        let moved = TicketError::InvalidTransition {
            from: TicketStatus::Cancelled,
            to: Some(TicketStatus::Completed),
        };
        assert_eq!(moved.to_string(), "Cannot move ticket from cancelled to completed");

        let updated = TicketError::InvalidTransition {
            from: TicketStatus::Completed,
            to: None,
        };
        assert_eq!(updated.to_string(), "Cannot update a completed ticket");
    }

    #[test]
    fn test_redeemed_token_is_a_conflict() {
        let response = TicketError::Upload(UploadTokenError::AlreadyRedeemed).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = TicketError::Upload(UploadTokenError::Malformed).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
