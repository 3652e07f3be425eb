//! Shared infrastructure for the flowclub workspace: environment
//! configuration and database pool construction.

pub mod config;
pub mod db;

pub use config::{Config, ConfigError};
pub use db::{create_pool, run_migrations};
