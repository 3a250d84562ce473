use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::{AuditEntry, AuditFilter, AuditPage};
use super::error::TicketError;
use super::permissions::AdminActor;
use super::redemption::{UploadFile, UploadRedemption};
use super::types::{CreateTicketRequest, ListQuery, Ticket, TicketStats, UpdateTicketRequest};
use super::upload::{UploadGrant, UploadToken};
use crate::core::shared::state::AppState;

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const ADMIN_LABEL_HEADER: &str = "x-admin-label";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Uuid, TicketError> {
    let raw = header(headers, ACTOR_HEADER)
        .ok_or_else(|| TicketError::Unauthenticated(format!("{ACTOR_HEADER} header is required")))?;
    Uuid::parse_str(raw)
        .map_err(|_| TicketError::Unauthenticated(format!("{ACTOR_HEADER} must be a UUID")))
}

fn admin_from_headers(state: &AppState, headers: &HeaderMap) -> Result<AdminActor, TicketError> {
    let token = header(headers, ADMIN_TOKEN_HEADER).ok_or_else(|| {
        TicketError::Unauthenticated(format!("{ADMIN_TOKEN_HEADER} header is required"))
    })?;
    let label = header(headers, ADMIN_LABEL_HEADER).unwrap_or_default();
    state
        .admin_gate
        .authenticate(label, token)
        .ok_or(TicketError::PermissionDenied)
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), TicketError> {
    let ticket = match header(&headers, IDEMPOTENCY_HEADER) {
        Some(key) => state.tickets.create_ticket_with_key(key, req).await?,
        None => state.tickets.create_ticket(req).await?,
    };
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Ticket>> {
    Json(state.tickets.list_tickets(&query).await)
}

pub async fn list_overdue_tickets(State(state): State<Arc<AppState>>) -> Json<Vec<Ticket>> {
    Json(state.tickets.list_overdue_tickets().await)
}

pub async fn get_ticket_stats(State(state): State<Arc<AppState>>) -> Json<TicketStats> {
    Json(state.tickets.get_ticket_stats().await)
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.get_ticket(id).await?))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.tickets.update_ticket(id, actor, req).await?))
}

pub async fn start_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Ticket>, TicketError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.tickets.start_ticket(id, actor).await?))
}

pub async fn complete_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Ticket>, TicketError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.tickets.complete_ticket(id, actor).await?))
}

pub async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Ticket>, TicketError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.tickets.cancel_ticket(id, actor).await?))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, TicketError> {
    let admin = admin_from_headers(&state, &headers)?;
    state.tickets.delete_ticket(id, &admin).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_ticket_audit_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, TicketError> {
    Ok(Json(state.tickets.get_ticket_audit_log(id).await?))
}

pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<AuditPage>, TicketError> {
    admin_from_headers(&state, &headers)?;
    Ok(Json(state.tickets.query_audit(&filter).await))
}

#[derive(Debug, Serialize)]
pub struct CanEditResponse {
    pub ticket_id: Uuid,
    pub chatter_id: Uuid,
    pub can_edit: bool,
}

pub async fn can_edit_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<CanEditResponse>, TicketError> {
    let actor = actor_from_headers(&headers)?;
    let can_edit = state.tickets.can_chatter_edit_ticket(actor, id).await?;
    Ok(Json(CanEditResponse {
        ticket_id: id,
        chatter_id: actor,
        can_edit,
    }))
}

pub async fn create_upload_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<UploadToken>), TicketError> {
    let actor = actor_from_headers(&headers)?;
    let token = state.tickets.create_upload_token(id, actor).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

#[derive(Debug, Deserialize)]
pub struct VerifyUploadRequest {
    pub token: String,
}

pub async fn verify_upload_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyUploadRequest>,
) -> Result<Json<UploadGrant>, TicketError> {
    Ok(Json(state.tickets.verify_upload_token(&req.token, Utc::now()).await?))
}

#[derive(Debug, Deserialize)]
pub struct RedeemUploadRequest {
    pub token: String,
    pub files: Vec<UploadFile>,
}

pub async fn redeem_upload_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RedeemUploadRequest>,
) -> Result<(StatusCode, Json<UploadRedemption>), TicketError> {
    let redemption = state
        .tickets
        .redeem_upload_token(&req.token, req.files, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(redemption)))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/stats", get(get_ticket_stats))
        .route("/api/tickets/overdue", get(list_overdue_tickets))
        .route(
            "/api/tickets/:id",
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route("/api/tickets/:id/start", put(start_ticket))
        .route("/api/tickets/:id/complete", put(complete_ticket))
        .route("/api/tickets/:id/cancel", put(cancel_ticket))
        .route("/api/tickets/:id/audit", get(get_ticket_audit_log))
        .route("/api/tickets/:id/can-edit", get(can_edit_ticket))
        .route("/api/tickets/:id/upload-token", post(create_upload_token))
        .route("/api/uploads/verify", post(verify_upload_token))
        .route("/api/uploads/redeem", post(redeem_upload_token))
        .route("/api/audit", get(query_audit))
}
