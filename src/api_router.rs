//! Combines the directory and ticket endpoints into one router.

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::main_module::health::health_check;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .merge(crate::directory::configure_directory_routes())
        .merge(crate::tickets::configure_tickets_routes())
}

/// The full application, state attached.
pub fn build_app(state: Arc<AppState>) -> Router {
    configure_api_routes().with_state(state)
}
