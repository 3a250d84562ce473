pub mod health;
pub mod server;
