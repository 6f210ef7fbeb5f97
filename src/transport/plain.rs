//! Cleartext transport: buffering only, immediately ready.

use super::{Transport, TransportState};
use bytes::BytesMut;
use std::io;

/// Plain transport for h2c connections and tests. Bytes pass through
/// unmodified; the two buffers exist so the event loop can move data in
/// whatever sizes the socket produces.
pub struct PlainTransport {
    state: TransportState,
    recv_buf: BytesMut,
    send_buf: BytesMut,
    send_pos: usize,
}

impl PlainTransport {
    pub fn new() -> Self {
        Self {
            state: TransportState::Ready,
            recv_buf: BytesMut::with_capacity(16_384),
            send_buf: BytesMut::with_capacity(16_384),
            send_pos: 0,
        }
    }
}

impl Default for PlainTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PlainTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != TransportState::Ready {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport not ready",
            ));
        }
        self.send_buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.recv_buf.is_empty() {
            return match self.state {
                TransportState::Closed => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed",
                )),
                _ => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            };
        }

        let n = buf.len().min(self.recv_buf.len());
        buf[..n].copy_from_slice(&self.recv_buf[..n]);
        let _ = self.recv_buf.split_to(n);
        Ok(n)
    }

    fn on_recv(&mut self, data: &[u8]) -> io::Result<()> {
        self.recv_buf.extend_from_slice(data);
        Ok(())
    }

    fn pending_send(&self) -> &[u8] {
        &self.send_buf[self.send_pos..]
    }

    fn advance_send(&mut self, n: usize) {
        self.send_pos += n;
        if self.send_pos >= self.send_buf.len() {
            self.send_buf.clear();
            self.send_pos = 0;
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state = TransportState::Closed;
        Ok(())
    }
}
