//! Crawl-Runner: supervised job execution for a browser-driven content crawler
//!
//! This crate takes queued extraction runs, executes each one as an isolated,
//! time-boxed child process, and provides the authenticated browser session and
//! resilient batch acquisition (attachments and videos) used by that process.

pub mod acquisition;
pub mod config;
pub mod extraction;
pub mod session;
pub mod state;
pub mod storage;
pub mod supervisor;

use thiserror::Error;

/// Main error type for Crawl-Runner operations
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("Browser error: {0}")]
    Browser(#[from] session::BrowserError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Failed to spawn extraction process `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Run {0} already has a live process")]
    AlreadyActive(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Missing extraction parameter: {0}")]
    MissingParameter(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
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

/// Result type alias for Crawl-Runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{ActiveRunRegistry, RunStatus};
pub use supervisor::{CancelHandle, Supervisor};
