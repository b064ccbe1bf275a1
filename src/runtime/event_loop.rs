//! Single-threaded edge-triggered event loop.
//!
//! Readiness model: the multiplexer reports a descriptor once per transition
//! to readable, then the loop drains it completely before waiting again.
//! The only blocking call is `Multiplexer::wait`; every socket handed to the
//! multiplexer is non-blocking.
//!
//! Lifecycle is explicit: `EventLoop::new` binds, listens and registers,
//! `run` dispatches forever, `shutdown` closes every descriptor.

use super::acceptor::accept_all;
use super::connection::{Connection, ConnectionRegistry};
use super::listener::ListenerSocket;
use super::nonblocking;
use super::poller::{Multiplexer, Readiness};
use super::reader::{drain_readable, CloseReason, ReadOutcome};
use super::sink::Sink;
use crate::config::Config;
use crate::error::{Error, Result};
use mio::Token;
use socket2::Socket;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsFd, AsRawFd};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Slab keys never reach this value.
const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Counters maintained across the loop's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub accepted: u64,
    /// Accepted while the connection table was full, then closed.
    pub rejected: u64,
    pub closed: u64,
    pub bytes_received: u64,
}

pub struct EventLoop<S: Sink> {
    listener: ListenerSocket,
    multiplexer: Multiplexer,
    connections: ConnectionRegistry,
    /// Reused for every wait.
    batch: Vec<Readiness>,
    /// Reused for every read.
    read_buf: Vec<u8>,
    sink: S,
    stats: LoopStats,
}

impl<S: Sink> EventLoop<S> {
    /// Bind, listen and register the listener. Every failure here is fatal.
    pub fn new(config: &Config, sink: S) -> Result<Self> {
        let listener =
            ListenerSocket::bind(config.host.as_deref(), &config.port, config.reuse_address)?;
        listener.set_nonblocking()?;
        listener.listen(config.backlog)?;

        let multiplexer = Multiplexer::new(config.batch_size)?;
        multiplexer.register(listener.as_raw_fd(), LISTENER_TOKEN)?;

        info!(
            fd = listener.as_raw_fd(),
            addr = %listener.local_addr(),
            batch_size = multiplexer.capacity(),
            chunk_size = config.chunk_size,
            max_connections = config.max_connections,
            "Listening"
        );

        Ok(Self {
            listener,
            multiplexer,
            connections: ConnectionRegistry::new(config.max_connections),
            batch: Vec::with_capacity(config.batch_size),
            read_buf: vec![0u8; config.chunk_size],
            sink,
            stats: LoopStats::default(),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Dispatch forever. Only returns on a fatal error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.turn(None)?;
        }
    }

    /// One wait followed by dispatch of the whole batch, in the order the
    /// multiplexer returned it. Returns the number of entries dispatched.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let mut batch = mem::take(&mut self.batch);
        let result = self.wait_and_dispatch(&mut batch, timeout);
        self.batch = batch;
        result
    }

    fn wait_and_dispatch(
        &mut self,
        batch: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        self.multiplexer.wait(batch, timeout)?;
        trace!(events = batch.len(), "Wait returned");

        for readiness in batch.iter() {
            self.dispatch(*readiness)?;
        }
        Ok(batch.len())
    }

    fn dispatch(&mut self, readiness: Readiness) -> Result<()> {
        if readiness.is_failure() {
            if readiness.token == LISTENER_TOKEN {
                // Nothing re-registers the listener after this.
                return Err(Error::ListenerFailed {
                    fd: self.listener.as_raw_fd(),
                });
            }
            let Token(id) = readiness.token;
            warn!(
                conn_id = id,
                error = readiness.error,
                hangup = readiness.hangup,
                "Readiness failure"
            );
            self.close_connection(id);
            return Ok(());
        }

        match readiness.token {
            LISTENER_TOKEN => self.accept_connections(),
            Token(id) => {
                self.read_connection(id);
                Ok(())
            }
        }
    }

    fn accept_connections(&mut self) -> Result<()> {
        let Self {
            listener,
            multiplexer,
            connections,
            stats,
            ..
        } = self;

        let accepted = accept_all(&*listener, |socket, peer| {
            admit(multiplexer, connections, stats, socket, peer)
        })?;
        trace!(accepted, "Accept cycle complete");
        Ok(())
    }

    fn read_connection(&mut self, id: usize) {
        let Some(conn) = self.connections.get_mut(id) else {
            trace!(conn_id = id, "Event for closed connection");
            return;
        };

        let outcome = drain_readable(&mut conn.socket, &mut self.read_buf, &mut self.sink);
        self.stats.bytes_received += outcome.bytes() as u64;

        match outcome {
            ReadOutcome::Continue { bytes } => {
                trace!(conn_id = id, bytes, "Drained connection");
            }
            ReadOutcome::Closed {
                reason: CloseReason::EndOfStream,
                ..
            } => {
                self.close_connection(id);
            }
            ReadOutcome::Closed {
                reason: CloseReason::Failed(e),
                ..
            } => {
                debug!(conn_id = id, error = %e, "Read error");
                self.close_connection(id);
            }
        }
    }

    /// Deregister and close. A key that is already gone is ignored, so a
    /// descriptor is never closed twice.
    fn close_connection(&mut self, id: usize) {
        if let Some(conn) = self.connections.remove(id) {
            let fd = conn.fd();
            if let Err(e) = self.multiplexer.deregister(fd) {
                debug!(conn_id = id, fd, error = %e, "Deregister failed");
            }
            drop(conn);
            self.stats.closed += 1;
            debug!(conn_id = id, fd, "Closed connection");
        }
    }

    /// Close every connection, then the listener.
    pub fn shutdown(mut self) -> LoopStats {
        let open = self.connections.len();
        for conn in self.connections.drain() {
            let fd = conn.fd();
            if let Err(e) = self.multiplexer.deregister(fd) {
                debug!(fd, error = %e, "Deregister failed");
            }
            self.stats.closed += 1;
        }
        let listener_fd = self.listener.as_raw_fd();
        if let Err(e) = self.multiplexer.deregister(listener_fd) {
            debug!(fd = listener_fd, error = %e, "Deregister failed");
        }

        info!(
            open_at_shutdown = open,
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            closed = self.stats.closed,
            bytes_received = self.stats.bytes_received,
            "Event loop shut down"
        );
        self.stats
    }
}

/// Configure and register one accepted socket.
///
/// A socket that cannot be made non-blocking or registered would stall the
/// loop under edge-triggered polling, so both failures are fatal.
fn admit(
    multiplexer: &Multiplexer,
    connections: &mut ConnectionRegistry,
    stats: &mut LoopStats,
    socket: Socket,
    peer: SocketAddr,
) -> Result<()> {
    let conn = Connection::new(socket, peer);
    let fd = conn.fd();
    let (host, port) = (conn.remote_host(), conn.remote_port());
    nonblocking::set_nonblocking(conn.socket.as_fd())?;

    // A connection over the limit is dropped here, which closes it.
    let Some(id) = connections.insert(conn) else {
        warn!(fd, peer = %peer, "Connection limit reached");
        stats.rejected += 1;
        return Ok(());
    };
    if let Err(e) = multiplexer.register(fd, Token(id)) {
        connections.remove(id);
        error!(fd, peer = %peer, "Failed to register connection");
        return Err(e);
    }

    stats.accepted += 1;
    debug!(
        conn_id = id,
        fd,
        host = %host,
        port = %port,
        "Accepted connection"
    );
    Ok(())
}
