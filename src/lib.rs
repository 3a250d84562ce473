pub mod api_router;
pub mod core;
pub mod directory;
pub mod main_module;
pub mod storage;
pub mod tickets;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::state::AppState;
