//! Error handling for the Parley CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Transport error: {0}")]
    Transport(#[from] parley_core::TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command does not start a chat session")]
    NoSession,
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
