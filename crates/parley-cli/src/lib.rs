//! Parley CLI library
//!
//! Console front-end for the Parley messenger: argument parsing, layered
//! configuration and the interactive console session.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::{AppConfig, ConfigError, ConsoleConfig};
pub use console::{Console, ConsoleSink};
pub use error::{CliError, Result};
