//! ElectrumX Monitor
//!
//! Health and peer-discovery monitor for a self-hosted ElectrumX index
//! server. Probes the server over its JSON-RPC line protocol, inspects the
//! container it runs in, and serves the result to a dashboard from a
//! two-tier cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ELECTRUMX MONITOR                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Port Resolver      ←── SERVICES variable of the container  │
//! │  Probe Client       ←── TCP / TLS JSON-RPC round trips      │
//! │  Stats Collector    ←── features, peers, runtime metrics    │
//! │  Stats Cache        ←── light (60s) and heavy (120s) tiers  │
//! │  Cache Warmer       ←── fills both tiers at startup         │
//! │  HTTP API (8080)    ←── dashboard JSON and metrics          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod config;
mod types;
mod ports;
mod runtime;
mod probe;
mod peers;
mod public_ip;
mod stats;
mod cache;
mod api;

use api::Metrics;
use cache::{CachePolicy, StatsCache};
use config::MonitorConfig;
use stats::StatsCollector;

/// ElectrumX Monitor - index server health and peer discovery
#[derive(Parser, Debug)]
#[command(name = "electrumx-monitor")]
#[command(version)]
#[command(about = "Health and peer-discovery monitor for an ElectrumX server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "electrumx-monitor.toml")]
    config: PathBuf,

    /// HTTP API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Host the index server is reached on
    #[arg(long)]
    index_host: Option<String>,

    /// Public address of this host; skips detection
    #[arg(long)]
    server_ip: Option<String>,

    /// Extra host to probe for the heavy tier (repeatable)
    #[arg(long = "supplemental-host")]
    supplemental_hosts: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into())
        )
        .init();

    info!("⚡ ElectrumX Monitor v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        MonitorConfig::default().save(&args.config)?;
        info!("📝 Default configuration written to {:?}", args.config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        MonitorConfig::load(&args.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
        MonitorConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_api_port(args.api_port)
        .with_index_host(args.index_host)
        .with_server_ip(args.server_ip)
        .with_supplemental_hosts(args.supplemental_hosts);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Index server: {} (container {})", config.index_host, config.container_name);
    info!("   API port: {}", config.api_port);
    info!(
        "   Cache TTL: light {}s, heavy {}s ({}s while empty)",
        config.light_ttl_secs, config.heavy_ttl_secs, config.empty_heavy_ttl_secs
    );
    info!("   Supplemental hosts: {}", config.supplemental_hosts.len());
    if let Some(ip) = &config.server_ip {
        info!("   Server IP override: {}", ip);
    }

    let shared_config = Arc::new(config);

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());

    // Acquisition pipeline and cache
    let collector = Arc::new(StatsCollector::from_config(shared_config.clone())?);
    let cache = Arc::new(StatsCache::new(
        collector,
        CachePolicy::from_config(&shared_config),
        metrics.clone(),
    ));
    info!("📦 Stats cache ready");

    // Start services
    let warmer_handle = cache::spawn_warmer(
        cache.clone(),
        shared_config.warm_retry_attempts,
        Duration::from_secs(shared_config.warm_retry_delay_secs),
    );

    let api_handle = tokio::spawn(api::run_api_server(
        shared_config.clone(),
        cache.clone(),
        metrics.clone(),
    ));

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = api_handle => {
            error!("HTTP API exited: {:?}", result);
        }
    }

    warmer_handle.abort();

    info!("👋 ElectrumX Monitor shutting down");
    Ok(())
}
