//! Readiness multiplexer.
//!
//! Thin owner of a `mio::Poll` (epoll on Linux, kqueue on macOS). mio always
//! registers sources edge-triggered, so a descriptor is reported once per
//! transition to readable and the consumer must drain it to `EWOULDBLOCK`.
//!
//! Sources are registered by raw descriptor and correlated through a `Token`
//! chosen by the caller; no pointers are stored in kernel records.

use crate::error::{Error, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Condition flags observed for one token in a wait batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub error: bool,
    /// Both directions closed (`EPOLLHUP`). A peer half-close only shows up
    /// as readable data followed by end-of-stream.
    pub hangup: bool,
}

impl Readiness {
    /// True when the entry cannot be serviced by a read or accept.
    pub fn is_failure(&self) -> bool {
        self.error || self.hangup || !self.readable
    }
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            error: event.is_error(),
            hangup: event.is_read_closed() && event.is_write_closed(),
        }
    }
}

pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    /// Create the kernel context with room for `capacity` events per wait.
    pub fn new(capacity: usize) -> Result<Self> {
        let poll = Poll::new().map_err(Error::MultiplexerCreate)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(capacity),
        })
    }

    /// Register `fd` for edge-triggered read readiness under `token`.
    ///
    /// On epoll, registering a descriptor that is already registered fails.
    pub fn register(&self, fd: RawFd, token: Token) -> Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
            .map_err(|source| Error::Register { fd, source })
    }

    /// Remove `fd` from the interest list. Must happen before the descriptor
    /// is closed so a reused descriptor number never inherits the old entry.
    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    /// Block until at least one source is ready or `timeout` elapses, then
    /// replace the contents of `batch` with the observed events.
    ///
    /// `None` blocks indefinitely. An interrupted wait yields an empty batch.
    pub fn wait(&mut self, batch: &mut Vec<Readiness>, timeout: Option<Duration>) -> Result<()> {
        batch.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(Error::Wait(e)),
        }

        batch.extend(self.events.iter().map(Readiness::from));
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    const SHORT: Option<Duration> = Some(Duration::from_millis(100));

    fn nonblocking_listener() -> TcpListener {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        listener
    }

    #[test]
    fn test_wait_times_out_with_empty_batch() {
        let mut mux = Multiplexer::new(8).unwrap();
        assert_eq!(mux.capacity(), 8);

        let mut batch = vec![Readiness {
            token: Token(3),
            readable: true,
            error: false,
            hangup: false,
        }];
        mux.wait(&mut batch, Some(Duration::from_millis(10))).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_listener_readiness_reported_under_token() {
        let mut mux = Multiplexer::new(8).unwrap();
        let listener = nonblocking_listener();
        mux.register(listener.as_raw_fd(), Token(42)).unwrap();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut batch = Vec::new();
        mux.wait(&mut batch, SHORT).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].token, Token(42));
        assert!(batch[0].readable);
        assert!(!batch[0].is_failure());
    }

    #[test]
    fn test_edge_triggered_reports_transition_once() {
        let mut mux = Multiplexer::new(8).unwrap();
        let listener = nonblocking_listener();
        mux.register(listener.as_raw_fd(), Token(1)).unwrap();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut batch = Vec::new();
        mux.wait(&mut batch, SHORT).unwrap();
        assert_eq!(batch.len(), 1);

        // The pending connection was never accepted, yet no new event fires.
        mux.wait(&mut batch, SHORT).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_half_close_is_readable_not_hangup() {
        let mut mux = Multiplexer::new(8).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        mux.register(server_side.as_raw_fd(), Token(5)).unwrap();

        client.write_all(b"ping").unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let mut batch = Vec::new();
        mux.wait(&mut batch, SHORT).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].readable);
        assert!(!batch[0].hangup);
        assert!(!batch[0].error);
    }

    // kqueue silently updates an existing registration.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_double_registration_fails() {
        let mux = Multiplexer::new(8).unwrap();
        let listener = nonblocking_listener();
        let fd = listener.as_raw_fd();

        mux.register(fd, Token(1)).unwrap();
        let err = mux.register(fd, Token(2)).unwrap_err();
        assert!(matches!(err, Error::Register { fd: f, .. } if f == fd));

        mux.deregister(fd).unwrap();
        mux.register(fd, Token(2)).unwrap();
    }

    #[test]
    fn test_failure_classification() {
        let base = Readiness {
            token: Token(0),
            readable: true,
            error: false,
            hangup: false,
        };
        assert!(!base.is_failure());
        assert!(Readiness { error: true, ..base }.is_failure());
        assert!(Readiness { hangup: true, ..base }.is_failure());
        assert!(Readiness { readable: false, ..base }.is_failure());
    }
}
