use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::TicketError;
use super::upload::{UploadGrant, UploadTokenError};
use crate::storage::{Collection, CollectionName, StorageBackend, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRedemption {
    pub nonce: String,
    pub ticket_id: Uuid,
    pub files: Vec<UploadFile>,
    pub redeemed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Spent upload tokens, persisted as the `upload_redemptions` collection.
///
/// A token is redeemed at most once. Entries are dropped once the token
/// they record has expired, since verification rejects it from then on.
#[derive(Debug)]
pub struct RedemptionLedger {
    entries: Collection<UploadRedemption>,
}

impl RedemptionLedger {
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StorageError> {
        Ok(Self {
            entries: Collection::load(CollectionName::UploadRedemptions, backend).await?,
        })
    }

    /// Spends `grant`. Fails with `AlreadyRedeemed` if its nonce was spent.
    pub async fn redeem(
        &self,
        grant: &UploadGrant,
        files: Vec<UploadFile>,
        now: DateTime<Utc>,
    ) -> Result<UploadRedemption, TicketError> {
        let redemption = UploadRedemption {
            nonce: grant.nonce.clone(),
            ticket_id: grant.ticket_id,
            files,
            redeemed_at: now,
            expires_at: grant.expires_at,
        };

        let redemption = self
            .entries
            .mutate(move |entries| {
                if entries.iter().any(|e| e.nonce == redemption.nonce) {
                    warn!("Upload token for ticket {} replayed", redemption.ticket_id);
                    return Err(TicketError::Upload(UploadTokenError::AlreadyRedeemed));
                }
                entries.retain(|e| e.expires_at > now);
                entries.push(redemption.clone());
                Ok(redemption)
            })
            .await?;

        debug!(
            "Redeemed upload token for ticket {} with {} file(s)",
            redemption.ticket_id,
            redemption.files.len()
        );
        Ok(redemption)
    }

    pub async fn is_redeemed(&self, nonce: &str) -> bool {
        self.entries.find(|e| e.nonce == nonce).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;
    use chrono::Duration;

    fn grant(nonce: &str, expires_at: DateTime<Utc>) -> UploadGrant {
        UploadGrant {
            ticket_id: Uuid::new_v4(),
            nonce: nonce.to_string(),
            expires_at,
            max_files: 2,
            max_file_size: 1024,
            allowed_types: vec!["image/png".to_string()],
        }
    }

    fn photo() -> UploadFile {
        UploadFile {
            name: "a.png".to_string(),
            size: 10,
            content_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_redemption_is_rejected() {
        let ledger = RedemptionLedger::open(Arc::new(InMemoryBackend::new()))
            .await
            .expect("open");
        let now = Utc::now();
        let grant = grant("n1", now + Duration::days(1));

        let first = ledger.redeem(&grant, vec![photo()], now).await.expect("redeem");
        assert_eq!(first.ticket_id, grant.ticket_id);
        assert!(ledger.is_redeemed("n1").await);

        let again = ledger.redeem(&grant, vec![photo()], now).await;
        assert!(matches!(
            again,
            Err(TicketError::Upload(UploadTokenError::AlreadyRedeemed))
        ));
    }

    #[tokio::test]
    async fn test_spent_tokens_survive_reload_until_expiry() {
        let backend = Arc::new(InMemoryBackend::new());
        let now = Utc::now();
        {
            let ledger = RedemptionLedger::open(backend.clone()).await.expect("open");
            ledger
                .redeem(&grant("short", now + Duration::hours(1)), vec![photo()], now)
                .await
                .expect("redeem");
            ledger
                .redeem(&grant("long", now + Duration::days(5)), vec![photo()], now)
                .await
                .expect("redeem");
        }

        let ledger = RedemptionLedger::open(backend).await.expect("reopen");
        assert!(ledger.is_redeemed("short").await);
        assert!(ledger.is_redeemed("long").await);

        let later = now + Duration::days(1);
        ledger
            .redeem(&grant("fresh", later + Duration::days(1)), vec![photo()], later)
            .await
            .expect("redeem");
        assert!(!ledger.is_redeemed("short").await);
        assert!(ledger.is_redeemed("long").await);
    }
}
