//! Connection table for the event loop.
//!
//! Each accepted socket lives in a slab; its key doubles as the readiness
//! token, so a ready event is correlated back to its connection by index
//! lookup. Removing an entry hands ownership of the socket back to the
//! caller, and dropping it closes the descriptor exactly once.

use slab::Slab;
use socket2::Socket;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

/// A single accepted client connection.
#[derive(Debug)]
pub struct Connection {
    /// Non-blocking socket for the connection.
    pub socket: Socket,
    /// Numeric peer address, kept for diagnostics.
    pub peer: SocketAddr,
}

impl Connection {
    pub fn new(socket: Socket, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Peer host in numeric form.
    pub fn remote_host(&self) -> String {
        self.peer.ip().to_string()
    }

    /// Peer port in numeric form.
    pub fn remote_port(&self) -> String {
        self.peer.port().to_string()
    }
}

/// Registry of open connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity; the connection is
    /// dropped and its socket closed.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection. A second removal of the same key yields `None`.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Remove every connection, yielding them for teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection> + '_ {
        self.connections.drain()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
