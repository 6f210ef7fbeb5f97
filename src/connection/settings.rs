//! Connection settings (RFC 7540 Section 6.5.2).

use crate::frame;

/// One endpoint's view of the connection settings.
///
/// The connection keeps two of these: the local settings it advertises
/// and enforces on the peer, and the remote settings the peer advertised
/// that bound what the connection may send.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// HPACK dynamic table size bound.
    pub header_table_size: u32,
    /// Whether PUSH_PROMISE is permitted.
    pub enable_push: bool,
    /// Ceiling on concurrently active streams opened by the peer.
    pub max_concurrent_streams: u32,
    /// Initial per-stream flow control window.
    pub initial_window_size: u32,
    /// Largest frame payload accepted.
    pub max_frame_size: u32,
    /// Bound on the decoded size of one header list.
    pub max_header_list_size: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            header_table_size: frame::DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false,
            max_concurrent_streams: frame::DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 16_384,
        }
    }
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_table_size(mut self, value: u32) -> Self {
        self.header_table_size = value;
        self
    }

    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    pub fn initial_window_size(mut self, value: u32) -> Self {
        self.initial_window_size = value;
        self
    }

    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.max_frame_size = value;
        self
    }

    pub fn max_header_list_size(mut self, value: u32) -> Self {
        self.max_header_list_size = value;
        self
    }
}
