//! Groove-Ripple: a resumable crawler for record collector accounts
//!
//! This crate discovers collector accounts breadth-first, pulls their public
//! collection, wantlist and contribution records from a rate-limited JSON API
//! and a cookie-gated HTML feed, resolves every edition to its canonical work,
//! and stores the result in SQLite so that interrupted runs resume exactly
//! where they stopped.

pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod frontier;
pub mod ingest;
pub mod model;
pub mod output;
pub mod repair;
pub mod resolver;
pub mod state;
pub mod storage;
pub mod transport;

use thiserror::Error;

/// Main error type for Groove-Ripple operations
#[derive(Debug, Error)]
pub enum GrooveError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid state transition for {account}: {from:?} -> {to:?}")]
    InvalidTransition {
        account: String,
        from: state::AccountState,
        to: state::AccountState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrooveError {
    /// Returns true when the run must stop and wait for an operator
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_fatal())
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Groove-Ripple operations
pub type Result<T> = std::result::Result<T, GrooveError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{AccountId, CanonicalId, EditionId, Interaction, InteractionKind, SourceKind};
pub use state::AccountState;
