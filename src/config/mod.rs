//! Configuration module for Groove-Ripple
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use groove_ripple::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("groove-ripple.toml")).unwrap();
//! println!("Crawler will visit at most {} accounts", config.crawler.max_accounts);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, CatalogConfig, Config, CrawlerConfig, FeedConfig, FieldPrecedence, OutputConfig,
    TransportConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
