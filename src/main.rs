//! edge-tcp: a single-threaded, edge-triggered TCP server core
//!
//! Accepts connections on one listening socket and drains every readable
//! connection to completion on each readiness notification. Received bytes
//! are written verbatim to stdout; diagnostics go to stderr.
//!
//! Features:
//! - IPv4 and IPv6 passive address resolution
//! - Edge-triggered readiness via epoll (Linux) or kqueue (macOS)
//! - Bounded connection table with O(1) token lookup
//! - Configuration via CLI arguments or TOML file

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("edge-tcp supports only Linux and macOS");

mod config;
mod error;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging; stdout carries payload, so logs go to stderr
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        host = config.host.as_deref().unwrap_or("*"),
        port = %config.port,
        batch_size = config.batch_size,
        chunk_size = config.chunk_size,
        backlog = ?config.backlog,
        "Starting edge-tcp server"
    );

    runtime::run(config)?;
    Ok(())
}
