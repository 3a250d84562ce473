//! Health check handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use crate::core::shared::state::AppState;

/// Served on both `/health` and `/api/health`.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let stats = state.tickets.get_ticket_stats().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "ticketdesk",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": state.config.storage.backend,
            "tickets": stats.total_tickets,
            "admin_enabled": state.admin_gate.is_enabled()
        })),
    )
}
