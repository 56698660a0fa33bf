//! Parley CLI - console messenger entry point

use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use parley_cli::{
    cli::{Cli, Commands},
    config::AppConfig,
    console::{spawn_stdin_reader, Console},
    error::CliError,
};
use parley_core::{SessionEnd, Signal, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    if cli.command == Commands::ExampleConfig {
        println!("{}", AppConfig::example_config());
        return Ok(());
    }

    // Load configuration
    let config = AppConfig::load_with_overrides(&cli).context("Failed to load configuration")?;

    // Initialize logging
    setup_logging(config.logging.verbose);

    let kind = cli.command.role_kind().ok_or(CliError::NoSession)?;
    let transport = Arc::new(
        Transport::from_config(kind, &config.transport).context("Invalid transport settings")?,
    );
    info!(
        "Starting as {} (send {}, listen {})",
        kind,
        transport.send_addr(),
        transport.listen_addr()
    );

    let signal = Signal::new();
    {
        let signal = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, ending session");
                signal.set();
            }
        });
    }

    let input = spawn_stdin_reader(signal.clone());
    let output = Arc::new(Mutex::new(std::io::stdout()));
    let console = Console::new(transport, config.console, output);

    match console.run(signal, input).await {
        Ok(end) => {
            println!("{}", describe(&end));
            if !end.is_clean() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Session could not start: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn describe(end: &SessionEnd) -> String {
    match end {
        SessionEnd::PeerClosed => "Peer disconnected".to_string(),
        SessionEnd::Signalled => "Session closed".to_string(),
        SessionEnd::QuitReceived => "Peer quit".to_string(),
        SessionEnd::QuitSent => "You quit".to_string(),
        SessionEnd::Failed(reason) => format!("Session failed: {}", reason),
    }
}
