//! Edge-triggered TCP runtime.
//!
//! Built bottom-up:
//! - `ListenerSocket`: address resolution, bind, listen
//! - `nonblocking`: `O_NONBLOCK` for every polled descriptor
//! - `Multiplexer`: edge-triggered readiness (epoll on Linux, kqueue on macOS)
//! - `accept_all` / `drain_readable`: drain-to-would-block dispatch
//! - `EventLoop`: owns all of the above plus the connection table

mod acceptor;
mod connection;
mod event_loop;
mod listener;
mod nonblocking;
mod poller;
mod reader;
mod sink;

use crate::config::Config;
use crate::error::Result;
use event_loop::EventLoop;
use sink::WriteSink;
use std::io;
use tracing::error;

/// Run the server, forwarding everything received to stdout.
///
/// Returns only when a fatal error stops the loop.
pub fn run(config: Config) -> Result<()> {
    let mut event_loop = EventLoop::new(&config, WriteSink::new(io::stdout()))?;

    let result = event_loop.run();
    if let Err(ref e) = result {
        error!(
            error = %e,
            open_connections = event_loop.connection_count(),
            accepted = event_loop.stats().accepted,
            "Event loop stopped"
        );
    }
    event_loop.shutdown();
    result
}
