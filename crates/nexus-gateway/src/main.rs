use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod app;
mod http;

#[derive(Parser)]
#[command(name = "nexus-gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Explicit config path; falls back to `NEXUS_CONFIG` env var, then `~/.nexus/nexus.toml`.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway's transcript hygiene pass once and exit.
    HygieneRun {
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "nexus_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("NEXUS_CONFIG").ok());
    let config = nexus_core::config::NexusConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        nexus_core::config::NexusConfig::default()
    });

    let state = Arc::new(app::AppState::new(config)?);

    match cli.command {
        Some(Command::HygieneRun { dry_run }) => {
            let report = state.hygiene.run(dry_run).await?;
            info!(?report, "hygiene run finished");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        None => serve(state).await,
    }
}

async fn serve(state: Arc<app::AppState>) -> anyhow::Result<()> {
    let bind = state.config.gateway.bind.clone();
    let port = state.config.gateway.port;
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("nexus gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then aborts every in-flight chat turn via the
/// orchestrator's registry before letting axum finish draining connections
/// cancellation model.
async fn shutdown_signal(state: Arc<app::AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    let aborted = state.orchestrator.registry().cancel_all();
    info!(aborted, "shutting down: aborted in-flight chat turns");
}
