//! dialog-differ Common Library
//!
//! Shared types, cache identities, validation, configuration and
//! persistence for the dialog-differ visual regression orchestrator.

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod store;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use config::DifferConfig;
pub use db::Database;
pub use error::{Error, RenderError, Result, StoreOp, ValidationError};
pub use store::{MemoryStore, SqliteStore, Store};
pub use types::*;

/// dialog-differ version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".dialog-differ")
}

/// Default configuration file
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("differ.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
