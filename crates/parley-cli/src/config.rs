//! Parley CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! defaults, `parley.toml` in the working directory, the file given with
//! `--config`, `PARLEY_*` environment variables, then command-line flags.
//! Nested keys use a double underscore in the environment, for example
//! `PARLEY_TRANSPORT__PORTS__HOST=10.0.0.2`.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use parley_core::TransportConfig;

use crate::cli::Cli;

const DEFAULT_CONFIG_FILE: &str = "parley.toml";
const ENV_PREFIX: &str = "PARLEY_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Parley CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transport settings shared by both roles
    pub transport: TransportConfig,

    /// Console presentation
    pub console: ConsoleConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// Console front-end options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Input line that ends the session
    pub quit_command: String,

    /// Prefix for lines this side sent
    pub local_label: String,

    /// Prefix for lines the peer sent
    pub peer_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Enable debug-level logging
    pub verbose: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            quit_command: "/q".to_string(),
            local_label: "Me".to_string(),
            peer_label: "Peer".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            // The console ends sessions with a quit frame on both sides.
            transport: TransportConfig {
                quit_on_token: true,
                ..TransportConfig::default()
            },
            console: ConsoleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    fn base_figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn check_config_path(config_path: Option<&Path>) -> Result<(), ConfigError> {
        match config_path {
            Some(path) if !path.exists() => Err(ConfigError::FileSystem(format!(
                "Config file not found: {}",
                path.display()
            ))),
            _ => Ok(()),
        }
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load defaults, config files and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::check_config_path(config_path)?;
        Self::extract(Self::base_figment(config_path))
    }

    /// Load configuration with command-line flags merged as the top layer
    ///
    /// Validation runs once on the merged result, so a flag can fix a value
    /// that is invalid in a file.
    pub fn load_with_overrides(cli: &Cli) -> Result<Self, ConfigError> {
        let config_path = cli.config.as_deref().map(Path::new);
        Self::check_config_path(config_path)?;

        let mut figment = Self::base_figment(config_path);

        // Apply command line overrides
        if let Some(host) = &cli.host {
            figment = figment.merge(("transport.ports.host", host));
        }
        if let Some(port) = cli.send_port {
            figment = figment.merge(("transport.ports.responder_send_port", port));
        }
        if let Some(port) = cli.listen_port {
            figment = figment.merge(("transport.ports.responder_listen_port", port));
        }
        if cli.verbose {
            figment = figment.merge(("logging.verbose", true));
        }

        Self::extract(figment)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.console.quit_command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Quit command must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use figment::Jail;

    #[test]
    fn test_default_config_creation() {
        let config = AppConfig::default();
        assert!(config.transport.quit_on_token);
        assert_eq!(config.transport.ports.responder_send_port, 60442);
        assert_eq!(config.transport.ports.responder_listen_port, 60441);
        assert_eq!(config.console.quit_command, "/q");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.console.quit_command = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = AppConfig::default();
        config.transport.recv_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [transport]
                recv_buffer_size = 512

                [transport.ports]
                host = "10.0.0.2"

                [console]
                peer_label = "Them"
                "#,
            )?;

            let config =
                AppConfig::load(Some(Path::new("custom.toml"))).expect("config should load");
            assert_eq!(config.transport.recv_buffer_size, 512);
            assert_eq!(config.transport.ports.host, "10.0.0.2");
            // Keys missing from the file keep their defaults.
            assert_eq!(config.transport.ports.responder_send_port, 60442);
            assert_eq!(config.console.peer_label, "Them");
            assert_eq!(config.console.local_label, "Me");
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/parley.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileSystem(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "parley.toml",
                "[transport.ports]\nresponder_send_port = 7002\nresponder_listen_port = 7001",
            )?;
            jail.set_env("PARLEY_TRANSPORT__PORTS__RESPONDER_LISTEN_PORT", "7003");
            jail.set_env("PARLEY_LOGGING__VERBOSE", "true");

            let config = AppConfig::load(None).expect("config should load");
            assert_eq!(config.transport.ports.responder_send_port, 7002);
            assert_eq!(config.transport.ports.responder_listen_port, 7003);
            assert!(config.logging.verbose);
            Ok(())
        });
    }

    #[test]
    fn test_cli_flags_override_everything() {
        Jail::expect_with(|_jail| {
            let cli = Cli::try_parse_from([
                "parley",
                "--host",
                "192.168.1.5",
                "--send-port",
                "9002",
                "--listen-port",
                "9001",
                "--verbose",
                "client",
            ])
            .unwrap();

            let config = AppConfig::load_with_overrides(&cli).expect("config should load");
            assert_eq!(config.transport.ports.host, "192.168.1.5");
            assert_eq!(config.transport.ports.responder_send_port, 9002);
            assert_eq!(config.transport.ports.responder_listen_port, 9001);
            assert!(config.logging.verbose);
            Ok(())
        });
    }

    #[test]
    fn test_conflicting_port_overrides_are_rejected() {
        Jail::expect_with(|_jail| {
            let cli = Cli::try_parse_from([
                "parley",
                "--send-port",
                "9000",
                "--listen-port",
                "9000",
                "server",
            ])
            .unwrap();
            assert!(AppConfig::load_with_overrides(&cli).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_cli_flag_repairs_invalid_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "parley.toml",
                "[transport.ports]\nresponder_send_port = 7000\nresponder_listen_port = 7000",
            )?;
            assert!(AppConfig::load(None).is_err());

            let cli = Cli::try_parse_from(["parley", "--send-port", "7001", "server"]).unwrap();
            let config = AppConfig::load_with_overrides(&cli).expect("flag should fix the clash");
            assert_eq!(config.transport.ports.responder_send_port, 7001);
            assert_eq!(config.transport.ports.responder_listen_port, 7000);
            Ok(())
        });
    }

    #[test]
    fn test_oversized_recv_buffer_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("PARLEY_TRANSPORT__RECV_BUFFER_SIZE", "4294967296");
            let err = AppConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn test_example_config_generation() {
        let example = AppConfig::example_config();
        assert!(example.contains("[transport]"));
        assert!(example.contains("[transport.ports]"));
        assert!(example.contains("[console]"));
        assert!(example.contains("quit_on_token = true"));
    }
}
