//! TripleProxy Server - request-routing proxy for a replicated triple store
//!
//! Writes go to the primary and are replicated to every verified replica;
//! reads are balanced across the primary and verified replicas.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripleproxy_server::{ProxyServer, app, config::Config};

/// TripleProxy Server CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tripleproxy-server")]
#[command(about = "Replication-aware proxy for a triple-store cluster", long_about = None)]
struct Args {
    /// Enable verbose logging (prints debug information to stdout/stderr)
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Directory containing proxy.toml (overrides TRIPLEPROXY_CONFIG_DIR)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tripleproxy-worker")
        .enable_all()
        .build()?;

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "tripleproxy_server=debug,tripleproxy_core=debug,tripleproxy_protocol=debug,tower_http=debug"
                .into()
        })
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "tripleproxy_server=info,tripleproxy_core=info,tower_http=info".into()
        })
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    rt.block_on(async_main(args.config_dir))
}

async fn async_main(config_dir: Option<PathBuf>) -> anyhow::Result<()> {
    // Load configuration (from env vars and/or config/proxy.toml)
    let config = match config_dir {
        Some(dir) => Config::load(dir)?,
        None => Config::from_env()?,
    };

    let server = Arc::new(ProxyServer::from_config(&config)?);
    let app = app(server);

    let listener = TcpListener::bind(&config.addr).await?;
    info!("TripleProxy Server listening on {}", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("TripleProxy Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
