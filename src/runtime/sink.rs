//! Destination for bytes read off connections.
//!
//! Payload is opaque: a sink receives exactly the bytes each read returned,
//! with no framing or decoding.

use std::io::Write;
use tracing::warn;

pub trait Sink {
    fn deliver(&mut self, bytes: &[u8]);
}

impl<F> Sink for F
where
    F: FnMut(&[u8]),
{
    fn deliver(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Forwards payload to a writer, flushing after every delivery.
///
/// Write failures are logged and dropped; a broken sink never tears down
/// the connection the bytes came from.
pub struct WriteSink<W: Write> {
    writer: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn deliver(&mut self, bytes: &[u8]) {
        if let Err(e) = self.writer.write_all(bytes).and_then(|()| self.writer.flush()) {
            warn!(error = %e, len = bytes.len(), "Failed to forward payload");
        }
    }
}
