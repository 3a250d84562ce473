mod error;
pub mod handlers;
mod service;
pub mod types;

pub use error::DirectoryError;
pub use handlers::configure_directory_routes;
pub use service::DirectoryService;
pub use types::{AssignModelsRequest, Chatter, Model, NewChatter, NewModel, RenameModelRequest};
