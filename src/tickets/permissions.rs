use log::warn;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::types::{Ticket, TicketStatus};

/// Whether `actor_id` may mutate `ticket`.
///
/// Only the originating chatter may, and only while the ticket is open.
/// Pure: looks at nothing but the snapshot it is given.
pub fn can_mutate(actor_id: Uuid, ticket: &Ticket) -> bool {
    is_owner(actor_id, ticket) && ticket.status.is_open()
}

/// Whether `actor_id` is the ticket's originating chatter, whatever its status.
pub fn is_owner(actor_id: Uuid, ticket: &Ticket) -> bool {
    ticket.chatter_id == Some(actor_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The actor is not the ticket's originating chatter.
    NotOwner,
    /// The actor owns the ticket, but it is already in a final state.
    Terminal(TicketStatus),
}

/// Explains why [`can_mutate`] refuses, or `None` when it allows.
pub fn denial_reason(actor_id: Uuid, ticket: &Ticket) -> Option<Denial> {
    if can_mutate(actor_id, ticket) {
        None
    } else if !is_owner(actor_id, ticket) {
        Some(Denial::NotOwner)
    } else {
        Some(Denial::Terminal(ticket.status))
    }
}

/// Proof that the caller presented a valid admin credential. Only
/// [`AdminGate::authenticate`] hands these out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminActor {
    label: String,
}

impl AdminActor {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Checks admin credentials against a configured SHA-256 token hash.
#[derive(Clone, Default)]
pub struct AdminGate {
    token_hash: Option<[u8; 32]>,
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate")
            .field("configured", &self.token_hash.is_some())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdminGateError {
    #[error("Admin token hash must be 64 hex characters")]
    InvalidHash,
}

impl AdminGate {
    /// A gate that rejects everyone.
    pub fn disabled() -> Self {
        Self { token_hash: None }
    }

    pub fn from_token(token: &str) -> Self {
        Self {
            token_hash: Some(Sha256::digest(token.as_bytes()).into()),
        }
    }

    pub fn from_hash_hex(hash: &str) -> Result<Self, AdminGateError> {
        let bytes = hex::decode(hash.trim()).map_err(|_| AdminGateError::InvalidHash)?;
        let token_hash: [u8; 32] = bytes.try_into().map_err(|_| AdminGateError::InvalidHash)?;
        Ok(Self {
            token_hash: Some(token_hash),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.token_hash.is_some()
    }

    pub fn authenticate(&self, label: &str, token: &str) -> Option<AdminActor> {
        let expected = self.token_hash.as_ref()?;
        let presented: [u8; 32] = Sha256::digest(token.as_bytes()).into();

        let diff = expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            warn!("Rejected admin credential for {label}");
            return None;
        }

        let label = label.trim();
        Some(AdminActor {
            label: if label.is_empty() {
                "admin".to_string()
            } else {
                label.to_string()
            },
        })
    }
}

#[cfg(test)]
pub(crate) fn test_admin(label: &str) -> AdminActor {
    AdminActor {
        label: label.to_string(),
    }
}
