//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};
use parley_core::RoleKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Host the pair runs on
    #[arg(long)]
    pub host: Option<String>,

    /// Port the server sends on (the client listens on it)
    #[arg(long)]
    pub send_port: Option<u16>,

    /// Port the server listens on (the client sends to it)
    #[arg(long)]
    pub listen_port: Option<u16>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Bind both ports and wait for a peer
    Server,
    /// Connect to a waiting server
    Client,
    /// Print an example configuration file and exit
    ExampleConfig,
}

impl Commands {
    /// Transport role for chat commands
    pub fn role_kind(&self) -> Option<RoleKind> {
        match self {
            Commands::Server => Some(RoleKind::Responder),
            Commands::Client => Some(RoleKind::Initiator),
            Commands::ExampleConfig => None,
        }
    }
}
