//! Forward proxy (v1)
//!
//! ```text
//!   client ──▶ net::listener ──▶ http::server
//!                                   │
//!              CONNECT host:port ───┼──▶ http::tunnel ──▶ target (opaque bytes)
//!                                   │
//!              other methods ───────┴──▶ http::dispatcher ──▶ origin
//!                                          │         │
//!                                   security::   cache::CacheStore
//!                                   AccessControl  (validators, artifacts)
//!
//!   admin API, config, observability and lifecycle wrap the above
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_proxy::config::{load_config, ProxyConfig};
use forward_proxy::lifecycle::{self, signals, Shutdown};
use forward_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "forward-proxy", version, about = "Forward HTTP/HTTPS proxy with blocklists and a response cache")]
struct Args {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long, env = "FORWARD_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        "forward-proxy starting"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(&shutdown);

    lifecycle::run(config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
