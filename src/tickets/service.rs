use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::audit::{self, AuditAction, AuditEntry, AuditFilter, AuditPage, AuditRecorder, FieldMap};
use super::error::TicketError;
use super::permissions::{can_mutate, denial_reason, is_owner, AdminActor, Denial};
use super::redemption::{RedemptionLedger, UploadFile, UploadRedemption};
use super::types::{
    CreateTicketRequest, ListQuery, Ticket, TicketDraft, TicketStats, TicketStatus,
    UpdateTicketRequest,
};
use super::upload::{UploadGrant, UploadToken, UploadTokenError, UploadTokenIssuer};
use crate::directory::types::{Chatter, Model};
use crate::storage::{EntityStore, Record, StoreError};

const DEFAULT_LIST_LIMIT: usize = 100;

/// How long an idempotency key keeps pointing at its ticket.
const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// Per-key slot: empty while the first create is in flight or after it failed.
type IdempotencySlot = Arc<Mutex<Option<(Uuid, DateTime<Utc>)>>>;

/// How to undo a ticket write whose audit entry could not be persisted.
enum Rollback {
    Restore(Ticket),
    Remove(Uuid),
}

/// Ticket lifecycle: creation, patching, status transitions and admin
/// deletion, each paired with exactly one audit entry.
pub struct TicketService {
    store: Arc<EntityStore>,
    audit: AuditRecorder,
    uploads: UploadTokenIssuer,
    redemptions: RedemptionLedger,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    create_lock: Mutex<()>,
    idempotency: Mutex<HashMap<String, IdempotencySlot>>,
}

impl TicketService {
    pub fn new(
        store: Arc<EntityStore>,
        audit: AuditRecorder,
        uploads: UploadTokenIssuer,
        redemptions: RedemptionLedger,
    ) -> Self {
        Self {
            store,
            audit,
            uploads,
            redemptions,
            locks: Mutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
            idempotency: Mutex::new(HashMap::new()),
        }
    }

    /// Serializes read-check-mutate-record for one ticket. Entries nobody
    /// holds or waits on are pruned on the way in.
    async fn lock_ticket(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn create_ticket(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError> {
        request.validate().map_err(TicketError::Validation)?;

        let model = match request.model_id {
            Some(id) => Some(self.resolve::<Model>(id, "model").await?),
            None => None,
        };
        let chatter = match request.chatter_id {
            Some(id) => Some(self.resolve::<Chatter>(id, "chatter").await?),
            None => None,
        };
        if let (Some(model), Some(chatter)) = (&model, &chatter) {
            if !chatter.is_assigned_to(model.id) {
                warn!(
                    "Chatter {} is not assigned to model {}; creating ticket anyway",
                    chatter.id, model.id
                );
            }
        }

        let changed_by = request
            .created_by
            .clone()
            .or_else(|| chatter.as_ref().map(|c| c.id.to_string()))
            .unwrap_or_else(|| "system".to_string());

        let _create = self.create_lock.lock().await;
        let number = self.audit.count(AuditAction::Created).await + 1;
        let ticket = self
            .store
            .create(TicketDraft {
                request,
                code: format!("TKT-{number:06}"),
                model_name: model.map(|m| m.name),
                chatter_name: chatter.map(|c| c.name),
            })
            .await?;

        self.record_or_rollback(
            Rollback::Remove(ticket.id),
            ticket.id,
            AuditAction::Created,
            FieldMap::new(),
            audit::snapshot(&ticket)?,
            &changed_by,
            "Ticket created",
        )
        .await?;

        info!("Ticket {} ({}) created by {changed_by}", ticket.code, ticket.id);
        Ok(ticket)
    }

    /// Like [`create_ticket`](Self::create_ticket), but a `key` repeated
    /// within a day returns the ticket created by the first call. Calls with
    /// the same key wait for each other; other keys are not held up.
    pub async fn create_ticket_with_key(
        &self,
        key: &str,
        request: CreateTicketRequest,
    ) -> Result<Ticket, TicketError> {
        let key = key.trim();
        if key.is_empty() {
            return self.create_ticket(request).await;
        }

        let slot = self.idempotency_slot(key).await;
        let mut slot = slot.lock_owned().await;
        if let Some((id, _)) = *slot {
            info!("Idempotency key {key} replayed for ticket {id}");
            return self.get_ticket(id).await;
        }
        let ticket = self.create_ticket(request).await?;
        *slot = Some((ticket.id, Utc::now()));
        Ok(ticket)
    }

    /// Slot for `key`. Expired and abandoned slots are pruned on the way in;
    /// slots someone holds or waits on are kept.
    async fn idempotency_slot(&self, key: &str) -> IdempotencySlot {
        let cutoff = Utc::now() - Duration::hours(IDEMPOTENCY_TTL_HOURS);
        let mut keys = self.idempotency.lock().await;
        keys.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot
                    .try_lock()
                    .map(|done| (*done).is_some_and(|(_, at)| at > cutoff))
                    .unwrap_or(true)
        });
        keys.entry(key.to_string()).or_default().clone()
    }

    pub async fn get_ticket(&self, id: Uuid) -> Result<Ticket, TicketError> {
        Ok(self.store.read(id).await?)
    }

    /// Matching tickets, newest first.
    pub async fn list_tickets(&self, query: &ListQuery) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.store.list(|t: &Ticket| query.matches(t)).await.collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tickets
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .collect()
    }

    /// Open tickets past their deadline, earliest deadline first.
    pub async fn list_overdue_tickets(&self) -> Vec<Ticket> {
        let now = Utc::now();
        let mut tickets: Vec<Ticket> = self.store.list(|t: &Ticket| t.is_overdue(now)).await.collect();
        tickets.sort_by_key(|t| t.deadline);
        tickets
    }

    pub async fn get_ticket_stats(&self) -> TicketStats {
        let now = Utc::now();
        let tickets: Vec<Ticket> = self.store.list(|_: &Ticket| true).await.collect();
        let count = |status: TicketStatus| tickets.iter().filter(|t| t.status == status).count();

        TicketStats {
            total_tickets: tickets.len(),
            pending_tickets: count(TicketStatus::Pending),
            in_progress_tickets: count(TicketStatus::InProgress),
            completed_tickets: count(TicketStatus::Completed),
            cancelled_tickets: count(TicketStatus::Cancelled),
            overdue_tickets: tickets.iter().filter(|t| t.is_overdue(now)).count(),
            open_value: tickets
                .iter()
                .filter(|t| t.status.is_open())
                .map(|t| t.price)
                .sum(),
        }
    }

    /// Patches business fields. A patch that changes nothing returns the
    /// ticket untouched and records nothing.
    pub async fn update_ticket(
        &self,
        id: Uuid,
        actor: Uuid,
        patch: UpdateTicketRequest,
    ) -> Result<Ticket, TicketError> {
        let _guard = self.lock_ticket(id).await;
        let current = self.get_ticket(id).await?;
        authorize(actor, &current, None)?;
        patch.validate().map_err(TicketError::Validation)?;

        let mut candidate = current.clone();
        patch.clone().apply(&mut candidate);
        let (old_values, _) = audit::diff(&current, &candidate)?;
        if old_values.is_empty() {
            info!("Update of ticket {id} by {actor} changed nothing");
            return Ok(current);
        }

        let (before, after) = self
            .store
            .update::<Ticket, _>(id, move |t| {
                patch.apply(t);
                Ok(())
            })
            .await?;
        let (old_values, new_values) = audit::diff(&before, &after)?;

        self.record_or_rollback(
            Rollback::Restore(before),
            id,
            AuditAction::Updated,
            old_values,
            new_values,
            &actor.to_string(),
            "Ticket updated",
        )
        .await?;

        info!("Ticket {} updated by {actor}", after.code);
        Ok(after)
    }

    pub async fn start_ticket(&self, id: Uuid, actor: Uuid) -> Result<Ticket, TicketError> {
        self.transition(id, actor, TicketStatus::InProgress, AuditAction::StatusChanged, "Ticket started")
            .await
    }

    pub async fn complete_ticket(&self, id: Uuid, actor: Uuid) -> Result<Ticket, TicketError> {
        self.transition(id, actor, TicketStatus::Completed, AuditAction::Completed, "Ticket completed")
            .await
    }

    pub async fn cancel_ticket(&self, id: Uuid, actor: Uuid) -> Result<Ticket, TicketError> {
        self.transition(id, actor, TicketStatus::Cancelled, AuditAction::StatusChanged, "Ticket cancelled")
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        actor: Uuid,
        target: TicketStatus,
        action: AuditAction,
        details: &str,
    ) -> Result<Ticket, TicketError> {
        let _guard = self.lock_ticket(id).await;
        let current = self.get_ticket(id).await?;
        authorize(actor, &current, Some(target))?;
        if !current.status.can_transition_to(target) {
            return Err(TicketError::InvalidTransition {
                from: current.status,
                to: Some(target),
            });
        }

        let (before, after) = self
            .store
            .update::<Ticket, _>(id, move |t| {
                t.status = target;
                Ok(())
            })
            .await?;
        let (old_values, new_values) = audit::diff(&before, &after)?;

        self.record_or_rollback(
            Rollback::Restore(before.clone()),
            id,
            action,
            old_values,
            new_values,
            &actor.to_string(),
            details,
        )
        .await?;

        info!("Ticket {} moved {} -> {} by {actor}", after.code, before.status, after.status);
        Ok(after)
    }

    /// Admin-only removal of an open ticket. The ticket leaves the active
    /// collection; its audit log, ending in a `deleted` entry, stays.
    pub async fn delete_ticket(&self, id: Uuid, admin: &AdminActor) -> Result<(), TicketError> {
        let _guard = self.lock_ticket(id).await;
        let current = self.get_ticket(id).await?;
        if current.status.is_terminal() {
            return Err(TicketError::InvalidTransition {
                from: current.status,
                to: Some(TicketStatus::Deleted),
            });
        }

        let removed = self.store.remove::<Ticket>(id).await?;
        let old_values = audit::snapshot(&removed)?;

        self.record_or_rollback(
            Rollback::Restore(removed),
            id,
            AuditAction::Deleted,
            old_values,
            FieldMap::new(),
            admin.label(),
            "Ticket deleted by admin",
        )
        .await?;

        info!("Ticket {} deleted by admin {}", current.code, admin.label());
        Ok(())
    }

    /// Full history of one ticket, oldest first. Deleted tickets keep theirs.
    pub async fn get_ticket_audit_log(&self, id: Uuid) -> Result<Vec<AuditEntry>, TicketError> {
        let entries = self.audit.query(id).await;
        if entries.is_empty() {
            self.get_ticket(id).await?;
        }
        Ok(entries)
    }

    pub async fn query_audit(&self, filter: &AuditFilter) -> AuditPage {
        self.audit.query_all(filter).await
    }

    pub async fn can_chatter_edit_ticket(&self, actor: Uuid, id: Uuid) -> Result<bool, TicketError> {
        let ticket = self.get_ticket(id).await?;
        Ok(can_mutate(actor, &ticket))
    }

    /// Issues an upload token to the ticket's originating chatter. The
    /// ticket's status does not matter.
    pub async fn create_upload_token(&self, id: Uuid, actor: Uuid) -> Result<UploadToken, TicketError> {
        let ticket = self.get_ticket(id).await?;
        if !is_owner(actor, &ticket) {
            warn!("Actor {actor} denied upload token for ticket {}", ticket.id);
            return Err(TicketError::PermissionDenied);
        }
        let token = self.uploads.issue(ticket.id, Utc::now())?;
        info!("Upload token issued for ticket {} to {actor}", ticket.code);
        Ok(token)
    }

    /// Checks a token without spending it.
    pub async fn verify_upload_token(&self, token: &str, now: DateTime<Utc>) -> Result<UploadGrant, TicketError> {
        let grant = self.uploads.verify(token, now)?;
        if self.redemptions.is_redeemed(&grant.nonce).await {
            return Err(UploadTokenError::AlreadyRedeemed.into());
        }
        Ok(grant)
    }

    /// Spends a token on one batch of files. Every file must fit the grant,
    /// and the ticket must still exist.
    pub async fn redeem_upload_token(
        &self,
        token: &str,
        files: Vec<UploadFile>,
        now: DateTime<Utc>,
    ) -> Result<UploadRedemption, TicketError> {
        let grant = self.uploads.verify(token, now)?;
        if files.is_empty() {
            return Err(TicketError::Validation("At least one file is required".to_string()));
        }
        grant.check_batch(files.len())?;
        for file in &files {
            grant.check_file(&file.name, file.size, &file.content_type)?;
        }
        let ticket = self.get_ticket(grant.ticket_id).await?;

        let redemption = self.redemptions.redeem(&grant, files, now).await?;
        info!(
            "Upload token for ticket {} redeemed with {} file(s)",
            ticket.code,
            redemption.files.len()
        );
        Ok(redemption)
    }

    async fn resolve<R: Record>(&self, id: Uuid, kind: &str) -> Result<R, TicketError> {
        match self.store.read::<R>(id).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound { .. }) => Err(TicketError::Validation(format!("Unknown {kind} {id}"))),
            Err(e) => Err(e.into()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_or_rollback(
        &self,
        rollback: Rollback,
        ticket_id: Uuid,
        action: AuditAction,
        old_values: FieldMap,
        new_values: FieldMap,
        changed_by: &str,
        details: &str,
    ) -> Result<AuditEntry, TicketError> {
        match self
            .audit
            .record(ticket_id, action, old_values, new_values, changed_by, details)
            .await
        {
            Ok(entry) => Ok(entry),
            Err(e) => {
                error!("Audit append for ticket {ticket_id} ({action}) failed, rolling back: {e}");
                let undone = match rollback {
                    Rollback::Restore(image) => self.store.restore(image).await,
                    Rollback::Remove(id) => self.store.remove::<Ticket>(id).await.map(|_| ()),
                };
                if let Err(undo) = undone {
                    error!("Rollback of ticket {ticket_id} failed: {undo}");
                }
                Err(e.into())
            }
        }
    }
}

/// `target` is the status a transition moves to, or `None` for an update.
fn authorize(actor: Uuid, ticket: &Ticket, target: Option<TicketStatus>) -> Result<(), TicketError> {
    match denial_reason(actor, ticket) {
        None => Ok(()),
        Some(Denial::NotOwner) => {
            warn!("Actor {actor} denied on ticket {}", ticket.id);
            Err(TicketError::PermissionDenied)
        }
        Some(Denial::Terminal(from)) => Err(TicketError::InvalidTransition { from, to: target }),
    }
}
