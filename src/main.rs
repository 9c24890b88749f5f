//! Edge authentication gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    EDGE GATEWAY                       │
//!                     │                                                       │
//!   Client Request    │  ┌──────────┐   ┌──────────┐   ┌───────────────┐      │
//!   ──────────────────┼─▶│ security │──▶│  access  │──▶│ auth decision │      │
//!                     │  │ headers  │   │   log    │   │ token + deny  │      │
//!                     │  └──────────┘   └──────────┘   └───────┬───────┘      │
//!                     │                                        ▼              │
//!                     │                               ┌───────────────┐       │
//!                     │                               │traffic control│       │
//!                     │                               │ fixed window  │       │
//!                     │                               └───────┬───────┘       │
//!                     │                                       ▼               │
//!   Client Response   │  ┌─────────────────────┐      ┌───────────────┐       │
//!   ◀─────────────────┼──│ health / auth / fwd │◀─────│    router     │───────┼──▶ Dependencies
//!                     │  └─────────────────────┘      └───────────────┘       │
//!                     │                                                       │
//!                     │   Shared store (Redis): denylist + rate counters      │
//!                     │   Breakers per dependency, health aggregator          │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::config::loader::{from_env_only, load_config};
use edge_gateway::config::watcher::ConfigWatcher;
use edge_gateway::lifecycle::{signals, Shutdown};
use edge_gateway::observability::{logging, metrics};
use edge_gateway::{store, HttpServer};

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "Edge authentication gateway", long_about = None)]
struct Args {
    /// TOML config file. Without one, defaults plus environment overrides are used.
    #[arg(short, long, env = "EDGE_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Watch the config file and hot-reload access rules, rate limits and headers.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => from_env_only()?,
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = ?config.store.backend,
        dependencies = config.dependencies.len(),
        rate_limit = config.rate_limit.default_limit,
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let kv = store::connect(&config).await?;

    let shutdown = Shutdown::new();
    signals::install(shutdown.clone());

    // Keep the watcher handle alive for the life of the server.
    let mut _watcher = None;
    let mut updates = None;
    if let (Some(path), true) = (&args.config, args.watch) {
        let (watcher, rx) = ConfigWatcher::new(path);
        _watcher = Some(watcher.run()?);
        updates = Some(rx);
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, kv);
    server.run(listener, updates, &shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
