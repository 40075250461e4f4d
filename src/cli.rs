//! Command-line entry points.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::app_state::AppState;
use crate::config_loader::{load_config, PortalConfig};
use crate::document_store::DocumentStore;
use crate::document_store_memory::MemoryDocumentStore;
use crate::document_store_sled::SledDocumentStore;
use crate::event_logger::EventLogger;
use crate::log_query::LogFilters;
use crate::log_sink::{LogLevel, TracingSink};
use crate::portal_web::build_router;
use crate::role::{Actor, Role};
use crate::services::load_seed_file;

/// Top-level CLI interface for the portal
#[derive(Parser)]
#[command(name = "civic_portal", version, about = "Citizen services portal")]
pub struct Cli {
    /// Path to the TOML config file (default: portal.toml or $PORTAL_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Host/IP to bind, overrides server.host
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: String,
    },

    /// Load the service catalog, from a TOML file or the built-in defaults
    SeedServices {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print log statistics as JSON
    LogStats {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Delete persisted log entries older than the given number of days
    SweepLogs {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

/// Open the configured backend: sled on disk, or memory in ephemeral mode
pub fn open_store(config: &PortalConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    if config.ephemeral {
        tracing::warn!("Ephemeral mode: data is kept in memory only");
        return Ok(Arc::new(MemoryDocumentStore::new()));
    }
    let store = SledDocumentStore::open(&config.data_dir)
        .with_context(|| format!("failed to open data directory {}", config.data_dir))?;
    Ok(Arc::new(store))
}

pub fn build_state(config: PortalConfig) -> anyhow::Result<Arc<AppState>> {
    let store = open_store(&config)?;
    let logger = EventLogger::new(
        config.logger.clone(),
        Some(store.clone()),
        Arc::new(TracingSink),
    );
    Ok(Arc::new(AppState::new(config, store, logger)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

async fn serve(state: Arc<AppState>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");

    state.logger.start();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, store = state.store.name(), session_id = state.logger.session_id(), "HTTP server listening");

    let app = build_router(state.clone());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Last-gasp flush runs whether the server stopped cleanly or not
    state.logger.shutdown().await;
    served.context("server error")
}

/// Dispatch a parsed command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PORTAL_CONFIG_PATH").ok());
    let config = load_config(config_path.as_deref()).context("failed to load configuration")?;
    let state = build_state(config)?;

    match cli.command {
        Commands::Serve { host, port } => serve(state, host, port).await,
        Commands::CreateAdmin {
            email,
            password,
            name,
        } => {
            let profile = state.auth.create_admin(&email, &password, &name).await?;
            println!("Created admin {} ({})", profile.email, profile.uid);
            state.logger.shutdown().await;
            Ok(())
        }
        Commands::SeedServices { file } => {
            let inputs = match file {
                Some(path) => load_seed_file(&path)?,
                None => crate::services::default_services(),
            };
            let actor = Actor::new("system", Role::Admin);
            let created = state.services.seed(&actor, &inputs).await?;
            println!("Seeded {created} service(s)");
            state.logger.shutdown().await;
            Ok(())
        }
        Commands::LogStats {
            level,
            user_id,
            session_id,
        } => {
            let level = level
                .map(|l| {
                    l.parse::<LogLevel>()
                        .map_err(|_| anyhow::anyhow!("invalid log level: {l}"))
                })
                .transpose()?;
            let filters = LogFilters {
                level,
                user_id,
                session_id,
                ..Default::default()
            };
            let stats = state.logs.statistics(&filters).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::SweepLogs { days } => {
            let removed = state.logs.retention_sweep(days).await?;
            println!("Removed {removed} log entr{}", if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sweep_with_default_days() {
        let cli = Cli::try_parse_from(["civic_portal", "sweep-logs"]).unwrap();
        assert!(matches!(cli.command, Commands::SweepLogs { days: 30 }));
    }

    #[test]
    fn parses_global_config_flag() {
        let cli = Cli::try_parse_from([
            "civic_portal",
            "serve",
            "--port",
            "9090",
            "--config",
            "alt.toml",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("alt.toml"));
        assert!(matches!(cli.command, Commands::Serve { port: Some(9090), .. }));
    }
}
