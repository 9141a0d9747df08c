//! Configuration module for Cold-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use cold_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Discovery batch size: {}", config.harvest.discovery_batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AuthConfig, Config, ContentStoreConfig, EnrichmentConfig, HarvestConfig, HttpConfig,
    OutputConfig, SiteEntry,
};
pub use validation::MAX_PAGE_SIZE;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
