//! Synchronous request/response transport over one HID stream.
//!
//! Every transaction writes one report and waits for one report, with the
//! total wait bounded by [`RESPONSE_TIMEOUT_MS`]. Reports the kernel buffered
//! between transactions are drained before each write so a late response from
//! an earlier cycle can never be decoded as the current one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::protocol::codec::{Request, Response};
use crate::protocol::RESPONSE_TIMEOUT_MS;
use crate::transport::hid::PacketIo;

/// Request/response transport for one hub unit.
///
/// Takes `&mut self` per transaction, so at most one request is in flight
/// per unit. The `connected` flag is shared with the directory: once a
/// stream error clears it, every further transaction fails fast with
/// [`LinkError::Disconnected`] and the directory evicts the unit.
pub struct LinkTransport {
    io: Box<dyn PacketIo>,
    report_len: usize,
    timeout: Duration,
    connected: Arc<AtomicBool>,
}

impl LinkTransport {
    /// Wrap an opened stream using `report_len`-byte reports.
    pub fn new(io: Box<dyn PacketIo>, report_len: usize) -> Self {
        LinkTransport {
            io,
            report_len,
            timeout: Duration::from_millis(RESPONSE_TIMEOUT_MS),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Report length of the underlying stream.
    pub fn report_len(&self) -> usize {
        self.report_len
    }

    /// Shared liveness flag for this unit's stream.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Whether the stream is still usable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mark_disconnected(&self, context: &str, err: &LinkError) {
        warn!(context, %err, "stream failed, marking unit disconnected");
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Execute one request and return its validated response report.
    ///
    /// Stream errors mark the unit disconnected; a quiet device yields
    /// [`LinkError::Timeout`] after the full wait and leaves the unit usable.
    pub fn send_receive(&mut self, request: &Request) -> Result<Response> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }

        self.drain_stale();

        let payload = request.payload();
        let mut report = vec![0u8; self.report_len];
        report[1] = payload.len() as u8;
        report[2..2 + payload.len()].copy_from_slice(payload);

        if let Err(err) = self.io.write_report(&report) {
            self.mark_disconnected("write", &err);
            return Err(LinkError::Disconnected);
        }
        debug!(len = payload.len(), "request written");

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; self.report_len];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::Timeout);
            }

            let read = match self.io.read_report(&mut buf, remaining.as_millis() as i32) {
                Ok(read) => read,
                Err(err) => {
                    self.mark_disconnected("read", &err);
                    return Err(LinkError::Disconnected);
                }
            };
            if read == 0 {
                continue;
            }

            return Response::parse(buf[..read].to_vec());
        }
    }

    /// Discard reports buffered before this transaction.
    fn drain_stale(&mut self) {
        let mut buf = vec![0u8; self.report_len];
        let mut drained = 0usize;
        loop {
            match self.io.read_report(&mut buf, 0) {
                Ok(0) | Err(_) => break,
                Ok(_) => drained += 1,
            }
        }
        if drained > 0 {
            debug!(drained, "discarded stale reports");
        }
    }
}
