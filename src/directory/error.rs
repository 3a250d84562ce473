use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::storage::{StorageError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<StoreError> for DirectoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::NotFound { kind, id } => Self::NotFound(format!("{kind} {id}")),
            StoreError::Storage(e) => Self::Storage(e),
        }
    }
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
