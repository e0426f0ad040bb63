//! parley-server: bounded-admission chat relay.
//!
//! Accepts TCP connections, authenticates against the SQLite credential
//! store, admits up to `max_active` concurrent sessions and queues the rest
//! FIFO with periodic wait-time estimates.

use clap::{Parser, Subcommand};
use parley_server::config::ServerConfig;
use parley_server::gateway::{CredentialGateway, SqliteCredentials};
use parley_server::server::RelayServer;
use parley_server::store::DirFileStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// parley-server — bounded-admission chat relay
#[derive(Parser, Debug)]
#[command(name = "parley-server", version, about = "Bounded-admission chat relay")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "parley.toml")]
    config: String,

    /// Maximum concurrently connected users
    #[arg(long)]
    max_active: Option<usize>,

    /// Seconds between wait-time updates to queued clients
    #[arg(long)]
    wait_tick: Option<u64>,

    /// Credential database path
    #[arg(long)]
    db: Option<String>,

    /// Directory for relayed file payloads
    #[arg(long)]
    files_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<AdminCommand>,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Create a user in the credential store
    Register { username: String, secret: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.max_active,
        cli.wait_tick,
        cli.db.as_deref(),
        cli.files_dir.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let gateway = match SqliteCredentials::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to open credential store");
            std::process::exit(1);
        }
    };

    if let Some(AdminCommand::Register { username, secret }) = cli.command {
        if gateway.user_exists(&username).await {
            error!(username = %username, "user already exists");
            std::process::exit(1);
        }
        if gateway.register(&username, &secret).await {
            info!(username = %username, "user registered");
            return;
        }
        error!(username = %username, "registration failed");
        std::process::exit(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        max_active = config.max_active,
        "starting parley-server"
    );

    let store = Arc::new(DirFileStore::new(config.files_dir.clone()));
    let server = RelayServer::new(config, gateway, store);

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind listen socket");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run(listener) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("parley-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
