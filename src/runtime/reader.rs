//! Connection draining.
//!
//! Connections are registered edge-triggered: data that is left unread when
//! a dispatch returns will not produce another notification. `drain_readable`
//! therefore reads until the socket reports would-block, end-of-stream, or a
//! hard error.

use super::sink::Sink;
use std::io::{self, Read};

/// Why a connection must be closed.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer performed an orderly shutdown (read returned 0).
    EndOfStream,
    /// Read failed with something other than would-block.
    Failed(io::Error),
}

#[derive(Debug)]
pub enum ReadOutcome {
    /// All available data consumed; the connection stays open and registered.
    Continue { bytes: usize },
    Closed { bytes: usize, reason: CloseReason },
}

impl ReadOutcome {
    pub fn bytes(&self) -> usize {
        match *self {
            ReadOutcome::Continue { bytes } | ReadOutcome::Closed { bytes, .. } => bytes,
        }
    }
}

/// Read `source` in `buf`-sized chunks, delivering every chunk to `sink`.
///
/// A full chunk says nothing about what is left; only would-block ends a
/// drain with the connection still open.
pub fn drain_readable<R, S>(source: &mut R, buf: &mut [u8], sink: &mut S) -> ReadOutcome
where
    R: Read + ?Sized,
    S: Sink + ?Sized,
{
    debug_assert!(!buf.is_empty(), "zero-length reads are indistinguishable from EOF");
    let mut bytes = 0;

    loop {
        match source.read(buf) {
            Ok(0) => {
                return ReadOutcome::Closed {
                    bytes,
                    reason: CloseReason::EndOfStream,
                }
            }
            Ok(n) => {
                sink.deliver(&buf[..n]);
                bytes += n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return ReadOutcome::Continue { bytes }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return ReadOutcome::Closed {
                    bytes,
                    reason: CloseReason::Failed(e),
                }
            }
        }
    }
}
