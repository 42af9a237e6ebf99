//! Access-server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! roadlink-server --bind 0.0.0.0:1808
//!
//! # Tighter fragment eviction and verbose logging
//! roadlink-server --bind 0.0.0.0:1808 --fragment-timeout-secs 30 --log-level debug
//! ```

use std::time::Duration;

use clap::Parser;
use roadlink_server::{CoreConfig, Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// JT/T 808 vehicle-telematics access server
#[derive(Parser, Debug)]
#[command(name = "roadlink-server")]
#[command(about = "JT/T 808 vehicle-telematics access server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:1808")]
    bind: String,

    /// Maximum concurrent terminal connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Seconds before an incomplete fragment group is evicted
    #[arg(long, default_value = "60")]
    fragment_timeout_secs: u64,

    /// Seconds to wait for a terminal's response to a server command
    #[arg(long, default_value = "10")]
    response_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerConfig {
        bind_address: args.bind,
        max_connections: args.max_connections,
        response_timeout: Duration::from_secs(args.response_timeout_secs),
        core: CoreConfig {
            fragment_timeout: Duration::from_secs(args.fragment_timeout_secs),
            ..CoreConfig::default()
        },
    };

    let server = Server::bind(config).await?;
    tracing::info!("listening on {}", server.local_addr()?);

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down");
            handle.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
