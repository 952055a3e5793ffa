pub mod backends;
pub mod collectors;
pub mod config;
pub mod error;
pub mod health;
pub mod scheduler;
pub mod server;
pub mod telemetry;
