use anyhow::Context;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use ticketdesk::main_module::server::run_axum_server;
use ticketdesk::{AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Starting ticketdesk {} with {:?} storage at {}",
        env!("CARGO_PKG_VERSION"),
        config.storage.backend,
        config.storage.data_dir.display()
    );

    let state = AppState::open(config)
        .await
        .context("Failed to open application state")?;
    run_axum_server(Arc::new(state)).await?;
    Ok(())
}
