use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tickets::UploadPolicy;

pub const CONFIG_FILE: &str = "ticketdesk.toml";
pub const ENV_PREFIX: &str = "TICKETDESK_";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    pub admin: AdminConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageKind,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::File,
            data_dir: PathBuf::from("./ticketdesk-data"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// HMAC key for upload tokens. Unset means a fresh key per process.
    pub signing_key: Option<String>,
    pub ttl_days: i64,
    pub max_files: u32,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let policy = UploadPolicy::default();
        Self {
            signing_key: None,
            ttl_days: policy.ttl_days,
            max_files: policy.max_files,
            max_file_size: policy.max_file_size,
            allowed_types: policy.allowed_types,
        }
    }
}

impl UploadConfig {
    pub fn policy(&self) -> UploadPolicy {
        UploadPolicy {
            ttl_days: self.ttl_days,
            max_files: self.max_files,
            max_file_size: self.max_file_size,
            allowed_types: self.allowed_types.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Hex SHA-256 of the admin token. Unset disables admin deletion.
    pub token_hash: Option<String>,
}

impl AppConfig {
    /// Defaults, then `ticketdesk.toml` if present, then `TICKETDESK_*`
    /// variables (`TICKETDESK_SERVER__PORT=9000`).
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, anyhow::Error> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_figment(Self::figment())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.uploads.ttl_days <= 0 {
            anyhow::bail!("uploads.ttl_days must be positive");
        }
        if self.uploads.max_files == 0 {
            anyhow::bail!("uploads.max_files must be positive");
        }
        if self.uploads.signing_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            anyhow::bail!("uploads.signing_key must not be blank");
        }
        Ok(())
    }
}
