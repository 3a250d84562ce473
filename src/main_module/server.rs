use log::{error, info};
use std::sync::Arc;

use crate::api_router::build_app;
use crate::core::shared::state::AppState;

pub async fn run_axum_server(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = state.config.bind_address();
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {} - is another instance running?", addr, e);
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down HTTP server...");
}
