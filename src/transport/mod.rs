//! Transport seam.
//!
//! The engine itself is sans-IO; this trait is the completion-style
//! contract the embedding layer drives. TLS, when present, terminates
//! behind the same interface: the engine always sees plaintext and is
//! handed the connection only after any handshake and the HTTP/2 preface
//! bytes are on their way.

mod plain;

pub use plain::PlainTransport;

use std::io;

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Performing a handshake; no application data yet.
    Handshaking,
    /// Ready for application data.
    Ready,
    /// Failed; the connection should be torn down.
    Error,
    /// Closed. Reads that still need bytes observe `TransportClosed`
    /// conditions (`UnexpectedEof`).
    Closed,
}

/// Abstraction over the byte pipe beneath one connection.
pub trait Transport {
    fn state(&self) -> TransportState;

    fn is_ready(&self) -> bool {
        self.state() == TransportState::Ready
    }

    /// Queue application data for transmission.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read available application data.
    ///
    /// Returns `WouldBlock` when nothing is buffered, and
    /// `UnexpectedEof` once the transport is closed with no bytes left.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Process raw bytes received from the socket.
    fn on_recv(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bytes that must go out on the socket.
    fn pending_send(&self) -> &[u8];

    /// Mark socket bytes as written.
    fn advance_send(&mut self, n: usize);

    fn has_pending_send(&self) -> bool {
        !self.pending_send().is_empty()
    }

    /// Initiate shutdown.
    fn shutdown(&mut self) -> io::Result<()>;
}
