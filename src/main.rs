// ABOUTME: Main entry point for the wagate gateway.
// ABOUTME: Parses the CLI, loads config, starts the session and serves HTTP until Ctrl-C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use wagate::{logging, server};
use wagate_core::credentials::CredentialStore;
use wagate_core::{Config, SessionManager, TransportRegistry};

#[derive(Parser)]
#[command(name = "wagate")]
#[command(about = "Self-healing chat-network session gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the session and serve the HTTP API (default)
    Run {
        /// Keep the session alive without the HTTP API
        #[arg(long)]
        no_server: bool,

        /// Emit JSON logs on stderr
        #[arg(long)]
        json: bool,
    },
    /// Wipe stored credentials for every transport without connecting
    Logout,
    /// Print the resolved configuration and paths
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command.unwrap_or(Command::Run {
        no_server: false,
        json: false,
    }) {
        Command::Run { no_server, json } => run(config, no_server, json).await,
        Command::Logout => logout(config).await,
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

async fn run(config: Config, no_server: bool, json: bool) -> Result<()> {
    let _log_guard = logging::init(&config.log_dir(), json)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        primary = %config.session.primary,
        fallback = ?config.session.fallback_kind(),
        data_dir = %config.data_dir().display(),
        "Starting wagate"
    );

    let manager = Arc::new(
        SessionManager::new(config, TransportRegistry::default())
            .context("Failed to build session manager")?,
    );

    // A failed first connect is not fatal; the watchdog and operator restarts recover
    match manager.start_session().await {
        Ok(outcome) => tracing::info!(outcome = ?outcome, "Session start requested"),
        Err(e) => tracing::error!(error = %e, "Initial session start failed"),
    }

    if no_server {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    } else {
        server::serve(Arc::clone(&manager), shutdown_signal()).await?;
    }

    tracing::info!("Shutting down");
    manager.stop_session().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
}

async fn logout(config: Config) -> Result<()> {
    let store = CredentialStore::new(config.credentials_dir());
    store.wipe_all().await?;
    println!("Credentials wiped: {}", store.root().display());
    Ok(())
}

fn print_config(config: &Config) {
    println!("{:#?}", config);
    println!();
    println!("data dir:        {}", config.data_dir().display());
    println!("credentials dir: {}", config.credentials_dir().display());
    println!("log dir:         {}", config.log_dir().display());
    println!("health db:       {}", config.health_db().display());
    println!(
        "transports:      {}",
        config
            .session
            .transport_order()
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
}
