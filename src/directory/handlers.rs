use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::error::DirectoryError;
use super::types::{AssignModelsRequest, Chatter, Model, NewChatter, NewModel, RenameModelRequest};
use crate::core::shared::state::AppState;

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<Model>> {
    Json(state.directory.list_models().await)
}

pub async fn create_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewModel>,
) -> Result<(StatusCode, Json<Model>), DirectoryError> {
    let model = state.directory.create_model(req).await?;
    Ok((StatusCode::CREATED, Json(model)))
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Model>, DirectoryError> {
    Ok(Json(state.directory.get_model(id).await?))
}

pub async fn rename_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameModelRequest>,
) -> Result<Json<Model>, DirectoryError> {
    Ok(Json(state.directory.rename_model(id, &req.name).await?))
}

pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, DirectoryError> {
    state.directory.delete_model(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_chatters(State(state): State<Arc<AppState>>) -> Json<Vec<Chatter>> {
    Json(state.directory.list_chatters().await)
}

pub async fn create_chatter(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewChatter>,
) -> Result<(StatusCode, Json<Chatter>), DirectoryError> {
    let chatter = state.directory.create_chatter(req).await?;
    Ok((StatusCode::CREATED, Json(chatter)))
}

pub async fn get_chatter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Chatter>, DirectoryError> {
    Ok(Json(state.directory.get_chatter(id).await?))
}

pub async fn assign_models(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignModelsRequest>,
) -> Result<Json<Chatter>, DirectoryError> {
    Ok(Json(state.directory.assign_models(id, &req.model_ids).await?))
}

pub fn configure_directory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/models", get(list_models).post(create_model))
        .route(
            "/api/models/:id",
            get(get_model).put(rename_model).delete(delete_model),
        )
        .route("/api/chatters", get(list_chatters).post(create_chatter))
        .route("/api/chatters/:id", get(get_chatter))
        .route("/api/chatters/:id/models", put(assign_models))
}
