//! Request/response exchanges over a transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{TransportError, VinciError};
use crate::protocol::{Decoder, Frame, Reply};
use crate::transport::Transport;

/// Bytes requested per read call.
const READ_CHUNK: usize = 4096;

/// Longest single read, so an abort is noticed while waiting for a reply.
const READ_SLICE: Duration = Duration::from_millis(100);

/// A transport paired with a reply decoder.
///
/// Only one exchange is ever in flight; callers serialise access through the
/// owning session. Raising the abort flag makes every later send or receive
/// fail with [`TransportError::Closed`], without taking the link from its
/// current holder.
pub struct Link {
    transport: Box<dyn Transport>,
    decoder: Decoder,
    abort: Arc<AtomicBool>,
}

impl Link {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            decoder: Decoder::new(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that aborts whatever exchange is in flight.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    fn check_abort(&self) -> Result<(), TransportError> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Endpoint name of the underlying transport.
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Write one frame.
    pub fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.check_abort()?;
        trace!(command = ?frame.command, index = frame.index, len = frame.payload.len(), "tx");
        self.transport.write_all(&frame.to_bytes())
    }

    /// Wait up to `timeout` for the next complete reply.
    ///
    /// A corrupt reply is returned as a protocol error after the decoder has
    /// dropped it; the caller decides whether to retry.
    pub fn receive(&mut self, timeout: Duration) -> Result<Reply, VinciError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(reply) = self.decoder.next_reply()? {
                trace!(reply = %reply.describe(), "rx");
                return Ok(reply);
            }
            self.check_abort()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout).into());
            }
            match self.transport.read(READ_CHUNK, remaining.min(READ_SLICE)) {
                Ok(bytes) => self.decoder.push(&bytes),
                Err(TransportError::Timeout(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a frame and wait for its reply. Stale buffered bytes are dropped
    /// first so an old reply is never matched to a new request.
    pub fn exchange(&mut self, frame: &Frame, timeout: Duration) -> Result<Reply, VinciError> {
        self.decoder.clear();
        self.send(frame)?;
        self.receive(timeout)
    }

    /// Close the transport.
    pub fn close(&mut self) {
        self.decoder.clear();
        self.transport.close();
    }
}
