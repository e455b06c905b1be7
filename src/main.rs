//! Caching forward HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ net::Listener ──▶ proxy::Dispatcher ──▶ proxy::ConnectionWorker
//!                                                          │
//!                        ┌─────────────────────────────────┤
//!                        ▼                                 ▼
//!                 cache::SharedCache  ◀── insert ──  origin::OriginFetcher ──▶ origin
//!                 (LRU, byte-bounded)                 (relay to client)
//! ```
//!
//! Usage: `forward-proxy <port> [--config proxy.toml]`

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use forward_proxy::cache::SharedCache;
use forward_proxy::config::{self, ConfigError, ProxyConfig};
use forward_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use forward_proxy::net::Listener;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::proxy::Dispatcher;

#[derive(Parser, Debug)]
#[command(name = "forward-proxy")]
#[command(about = "Caching forward HTTP proxy", long_about = None)]
struct Cli {
    /// Port to listen on.
    port: u16,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    config.listener.port = cli.port;
    config::validation::validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        port = config.listener.port,
        max_connections = config.listener.max_connections,
        max_cache_size = config.cache.max_cache_size,
        max_object_size = config.cache.max_object_size,
        coalesce = config.cache.coalesce,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let listener = Listener::bind(&config.listener).await?;
    let cache = SharedCache::from_config(&config.cache);
    let dispatcher = Dispatcher::new(listener, &config, cache.clone());

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    let remaining = dispatcher.run(rx).await;

    let stats = cache.stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        entries = stats.entries,
        bytes = stats.total_bytes,
        evictions = stats.evictions,
        open_connections = remaining,
        "Shutdown complete"
    );
    Ok(())
}
