//! Accept-queue draining.
//!
//! The listener is registered edge-triggered, so one readiness event may
//! stand for any number of queued connections. `accept_all` keeps accepting
//! until the kernel reports `EWOULDBLOCK`.

use crate::error::Result;
use std::io;
use std::net::SocketAddr;
use tracing::{error, trace};

/// Source of accepted connections.
pub trait Accept {
    type Stream;

    fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;
}

/// Accept every pending connection and hand each one to `admit`.
///
/// Returns the number of connections accepted. An accept failure other than
/// would-block is logged and ends this cycle without being fatal. Errors
/// returned by `admit` are fatal and propagate immediately.
pub fn accept_all<L, F>(listener: &L, mut admit: F) -> Result<usize>
where
    L: Accept + ?Sized,
    F: FnMut(L::Stream, SocketAddr) -> Result<()>,
{
    let mut accepted = 0;

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                admit(stream, peer)?;
                accepted += 1;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(accepted, "Accept queue drained");
                break;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }

    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};

    /// Listener whose queue is scripted; an empty queue reports would-block.
    struct MockListener {
        queue: RefCell<VecDeque<io::Result<u16>>>,
    }

    impl MockListener {
        fn with_pending(count: u16) -> Self {
            Self::scripted((0..count).map(Ok).collect())
        }

        fn scripted(results: Vec<io::Result<u16>>) -> Self {
            Self {
                queue: RefCell::new(results.into()),
            }
        }

        fn remaining(&self) -> usize {
            self.queue.borrow().len()
        }
    }

    impl Accept for MockListener {
        type Stream = u16;

        fn accept(&self) -> io::Result<(u16, SocketAddr)> {
            match self.queue.borrow_mut().pop_front() {
                Some(Ok(id)) => Ok((id, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000 + id))),
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    #[test]
    fn test_accepts_every_queued_connection() {
        let listener = MockListener::with_pending(64);
        let mut admitted = Vec::new();

        let count = accept_all(&listener, |id, peer| {
            assert_eq!(peer.port(), 40000 + id);
            admitted.push(id);
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 64);
        assert_eq!(admitted, (0..64u16).collect::<Vec<_>>());
        assert_eq!(listener.remaining(), 0);
    }

    #[test]
    fn test_empty_queue_is_not_an_error() {
        let listener = MockListener::with_pending(0);
        let count = accept_all(&listener, |_, _| panic!("nothing to admit")).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_interrupted_accept_is_retried() {
        let listener = MockListener::scripted(vec![
            Ok(1),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(2),
        ]);
        let count = accept_all(&listener, |_, _| Ok(())).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_accept_error_ends_cycle_without_failing() {
        let listener = MockListener::scripted(vec![
            Ok(1),
            Err(io::ErrorKind::ConnectionAborted.into()),
            Ok(2),
        ]);
        let count = accept_all(&listener, |_, _| Ok(())).unwrap();
        assert_eq!(count, 1);
        // The next readiness cycle picks up what is left.
        assert_eq!(listener.remaining(), 1);
    }

    #[test]
    fn test_admit_failure_propagates() {
        let listener = MockListener::with_pending(3);
        let err = accept_all(&listener, |id, _| {
            if id == 1 {
                Err(Error::Register {
                    fd: 9,
                    source: io::ErrorKind::OutOfMemory.into(),
                })
            } else {
                Ok(())
            }
        })
        .unwrap_err();

        assert!(matches!(err, Error::Register { fd: 9, .. }));
        assert_eq!(listener.remaining(), 1);
    }
}
