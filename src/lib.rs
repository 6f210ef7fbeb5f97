//! h2-engine - server-side HTTP/2 connection engine.
//!
//! This crate multiplexes one byte-oriented transport (already past TLS
//! and ALPN) into concurrently live request/response streams. It is
//! sans-IO and does not use async/await: the embedding layer feeds
//! received bytes in and shuttles queued bytes out, and everything in
//! between is deterministic.
//!
//! # Architecture
//!
//! - `frame`: frame header codec, typed frames, per-type validation
//! - `hpack`: header fields and the HPACK seam (tables are external,
//!   supplied by the `hpack` crate through a pair of traits)
//! - `connection`: the arbiter - header block assembly, stream admission
//!   and lifecycle, flow control, error classification
//! - `transport`: the byte-pipe contract the embedder drives
//!
//! # Usage sketch
//!
//! ```no_run
//! use h2_engine::{
//!     HeaderBlock, HeaderField, ServerConnection, ServerEvent, StreamDecision, StreamId,
//! };
//!
//! let mut conn = ServerConnection::new();
//! conn.set_listener(Box::new(|_id: StreamId, _req: &HeaderBlock| StreamDecision::Accept));
//!
//! // Socket bytes in:
//! let received: &[u8] = &[];
//! conn.feed(received);
//!
//! for event in conn.poll_events() {
//!     if let ServerEvent::StreamOpened { stream_id, .. } = event {
//!         let _request = conn.read_headers(stream_id);
//!         conn.send_headers(stream_id, &[HeaderField::new(":status", "200")], false)
//!             .unwrap();
//!         conn.send_data(stream_id, b"hello", true).unwrap();
//!     }
//! }
//!
//! // Queued bytes out:
//! let out = conn.pending_send().to_vec();
//! conn.advance_send(out.len());
//! ```

pub mod connection;
pub mod frame;
pub mod hpack;
pub mod transport;

pub use frame::{
    CONNECTION_PREFACE, ContinuationFrame, DEFAULT_HEADER_TABLE_SIZE,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_CONCURRENT_STREAMS, DEFAULT_MAX_FRAME_SIZE,
    DataFrame, ErrorCode, FRAME_HEADER_SIZE, Frame, FrameDecoder, FrameEncoder, FrameError,
    FrameHeader, FrameType, GoAwayFrame, HeadersFrame, PingFrame, Priority, PriorityFrame,
    PushPromiseFrame, RstStreamFrame, Setting, SettingId, SettingsFrame, StreamId, UnknownFrame,
    WindowUpdateFrame,
};

pub use crate::hpack::{HeaderDecoder, HeaderEncoder, HeaderField, HpackDecoder, HpackEncoder};

pub use connection::{
    ConnectionError, ConnectionSettings, ConnectionState, FlowControl, HeaderBlock,
    ServerConnection, ServerEvent, StreamDecision, StreamError, StreamListener, StreamState,
    WriteError,
};

pub use transport::{PlainTransport, Transport, TransportState};
