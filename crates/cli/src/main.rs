//! Chatbridge CLI — the main entry point.
//!
//! Commands:
//! - `serve` — Start the webhook gateway
//! - `init`  — Print a default configuration file
//! - `check` — Load and validate the configuration, then exit

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "chatbridge",
    about = "Chatbridge — webhook bridge between a messaging platform and an LLM",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "chatbridge.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook gateway server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print a default configuration file to stdout
    Init,

    /// Load and validate the configuration, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = chatbridge_config::AppConfig::load(&cli.config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            chatbridge_gateway::start(config).await?;
        }
        Commands::Init => {
            print!("{}", chatbridge_config::AppConfig::default_toml());
        }
        Commands::Check => {
            let config = chatbridge_config::AppConfig::load(&cli.config)?;
            tracing::info!("Configuration OK: {config:?}");
        }
    }

    Ok(())
}
