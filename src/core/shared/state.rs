use log::{info, warn};
use std::sync::Arc;

use crate::core::config::{AppConfig, StorageKind};
use crate::directory::DirectoryService;
use crate::storage::{EntityStore, InMemoryBackend, JsonFileBackend, StorageBackend, StorageError};
use crate::tickets::{AdminGate, AuditRecorder, RedemptionLedger, TicketService, UploadTokenIssuer};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Invalid admin configuration: {0}")]
    Admin(#[from] crate::tickets::permissions::AdminGateError),
}

/// Shared handle passed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<EntityStore>,
    pub directory: DirectoryService,
    pub tickets: TicketService,
    pub admin_gate: AdminGate,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("admin_gate", &self.admin_gate)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Opens the configured backend and loads every collection from it.
    pub async fn open(config: AppConfig) -> Result<Self, StateError> {
        let backend: Arc<dyn StorageBackend> = match config.storage.backend {
            StorageKind::File => Arc::new(JsonFileBackend::open(&config.storage.data_dir).await?),
            StorageKind::Memory => {
                warn!("Using in-memory storage; nothing survives a restart");
                Arc::new(InMemoryBackend::new())
            }
        };
        Self::with_backend(config, backend).await
    }

    pub async fn with_backend(
        config: AppConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StateError> {
        let admin_gate = match config.admin.token_hash.as_deref() {
            Some(hash) => AdminGate::from_hash_hex(hash)?,
            None => {
                warn!("No admin token hash configured; ticket deletion is disabled");
                AdminGate::disabled()
            }
        };

        let policy = config.uploads.policy();
        let uploads = match config.uploads.signing_key.as_deref() {
            Some(key) => UploadTokenIssuer::new(key.as_bytes().to_vec(), policy),
            None => UploadTokenIssuer::ephemeral(policy),
        };

        let store = Arc::new(EntityStore::open(backend.clone()).await?);
        let audit = AuditRecorder::open(backend.clone()).await?;
        let redemptions = RedemptionLedger::open(backend).await?;

        info!("Application state ready");
        Ok(Self {
            directory: DirectoryService::new(store.clone()),
            tickets: TicketService::new(store.clone(), audit, uploads, redemptions),
            store,
            admin_gate,
            config,
        })
    }
}
