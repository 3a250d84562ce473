pub mod audit;
mod error;
pub mod handlers;
pub mod permissions;
pub mod redemption;
mod service;
pub mod types;
pub mod upload;


pub use audit::{AuditAction, AuditEntry, AuditFilter, AuditPage, AuditRecorder};
pub use error::TicketError;
pub use handlers::configure_tickets_routes;
pub use permissions::{can_mutate, is_owner, AdminActor, AdminGate};
pub use redemption::{RedemptionLedger, UploadFile, UploadRedemption};
pub use service::TicketService;
pub use types::{
    CreateTicketRequest, ListQuery, Ticket, TicketPriority, TicketStats, TicketStatus,
    UpdateTicketRequest,
};
pub use upload::{UploadGrant, UploadPolicy, UploadToken, UploadTokenError, UploadTokenIssuer};
