//! Upload tokens: signed, time-boxed capabilities that let the external file
//! intake attach files to exactly one ticket and do nothing else.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const UPLOAD_TOKEN_TTL_DAYS: i64 = 10;
pub const UPLOAD_SCOPE: &str = "upload";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub ttl_days: i64,
    pub max_files: u32,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            ttl_days: UPLOAD_TOKEN_TTL_DAYS,
            max_files: 10,
            max_file_size: 50 * 1024 * 1024,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadToken {
    pub token: String,
    pub ticket_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub max_files: u32,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

/// What a verified token allows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadGrant {
    pub ticket_id: Uuid,
    /// Identifies the token for one-time redemption.
    #[serde(skip_serializing)]
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
    pub max_files: u32,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

impl UploadGrant {
    pub fn check_batch(&self, file_count: usize) -> Result<(), UploadTokenError> {
        if file_count > self.max_files as usize {
            return Err(UploadTokenError::TooManyFiles {
                count: file_count,
                max: self.max_files,
            });
        }
        Ok(())
    }

    pub fn check_file(&self, name: &str, size: u64, content_type: &str) -> Result<(), UploadTokenError> {
        if size > self.max_file_size {
            return Err(UploadTokenError::FileTooLarge {
                name: name.to_string(),
                size,
                max: self.max_file_size,
            });
        }
        let content_type = content_type.trim().to_lowercase();
        if !self.allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&content_type)) {
            return Err(UploadTokenError::TypeNotAllowed(content_type));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadTokenError {
    #[error("Malformed upload token")]
    Malformed,
    #[error("Upload token signature mismatch")]
    BadSignature,
    #[error("Upload token scope {0} does not allow uploads")]
    WrongScope(String),
    #[error("Upload token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("{count} files exceed the limit of {max}")]
    TooManyFiles { count: usize, max: u32 },
    #[error("{name} is {size} bytes, limit is {max}")]
    FileTooLarge { name: String, size: u64, max: u64 },
    #[error("Content type {0} is not allowed")]
    TypeNotAllowed(String),
    #[error("Upload token was already redeemed")]
    AlreadyRedeemed,
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadClaims {
    tid: Uuid,
    scope: String,
    iat: i64,
    exp: i64,
    max_files: u32,
    max_size: u64,
    types: Vec<String>,
    nonce: String,
}

/// Issues and verifies upload tokens with an HMAC-SHA256 key. Verification
/// needs no storage: everything the grant carries is inside the signed claims.
#[derive(Clone)]
pub struct UploadTokenIssuer {
    key: Vec<u8>,
    policy: UploadPolicy,
}

impl std::fmt::Debug for UploadTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTokenIssuer")
            .field("policy", &self.policy)
            .finish()
    }
}

impl UploadTokenIssuer {
    pub fn new(key: impl Into<Vec<u8>>, policy: UploadPolicy) -> Self {
        Self {
            key: key.into(),
            policy,
        }
    }

    /// Issuer with a random key. Its tokens do not survive a restart.
    pub fn ephemeral(policy: UploadPolicy) -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        warn!("No upload signing key configured; using an ephemeral key");
        Self::new(key, policy)
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn issue(&self, ticket_id: Uuid, now: DateTime<Utc>) -> Result<UploadToken, UploadTokenError> {
        let exp = now.timestamp() + Duration::days(self.policy.ttl_days).num_seconds();
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or(UploadTokenError::Malformed)?;

        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let claims = UploadClaims {
            tid: ticket_id,
            scope: UPLOAD_SCOPE.to_string(),
            iat: now.timestamp(),
            exp,
            max_files: self.policy.max_files,
            max_size: self.policy.max_file_size,
            types: self.policy.allowed_types.clone(),
            nonce: hex::encode(nonce),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| UploadTokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(payload.as_bytes())?.finalize().into_bytes());

        debug!("Issued upload token for ticket {ticket_id}, expires {expires_at}");
        Ok(UploadToken {
            token: format!("{payload}.{signature}"),
            ticket_id,
            expires_at,
            max_files: claims.max_files,
            max_file_size: claims.max_size,
            allowed_types: claims.types,
        })
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<UploadGrant, UploadTokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(UploadTokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| UploadTokenError::Malformed)?;
        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| UploadTokenError::BadSignature)?;

        let claims: UploadClaims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(UploadTokenError::Malformed)?;

        if claims.scope != UPLOAD_SCOPE {
            return Err(UploadTokenError::WrongScope(claims.scope));
        }
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(UploadTokenError::Malformed)?;
        if now >= expires_at {
            return Err(UploadTokenError::Expired(expires_at));
        }

        Ok(UploadGrant {
            ticket_id: claims.tid,
            nonce: claims.nonce,
            expires_at,
            max_files: claims.max_files,
            max_file_size: claims.max_size,
            allowed_types: claims.types,
        })
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, UploadTokenError> {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.key).map_err(|_| UploadTokenError::Malformed)?;
        mac.update(payload);
        Ok(mac)
    }
}
