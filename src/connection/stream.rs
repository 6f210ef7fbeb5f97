//! Per-stream state machine (RFC 7540 Section 5.1).

use bytes::{Bytes, BytesMut};

use super::flow_control::FlowControl;
use crate::frame::{ErrorCode, StreamId};
use crate::hpack::HeaderField;

/// Stream lifecycle states.
///
/// `Reset` is kept separate from `Closed` so callers can tell a cancelled
/// exchange from a completed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, no HEADERS applied yet.
    Idle,
    /// Reserved by a local PUSH_PROMISE. Never entered here; the server
    /// does not originate pushes.
    ReservedLocal,
    /// Reserved by a remote PUSH_PROMISE.
    ReservedRemote,
    /// Both directions live.
    Open,
    /// We sent END_STREAM; the peer may still send.
    HalfClosedLocal,
    /// The peer sent END_STREAM; we may still send.
    HalfClosedRemote,
    /// Both directions finished normally.
    Closed,
    /// Terminated by RST_STREAM or local cancel.
    Reset,
}

impl StreamState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Reset)
    }
}

/// A stream-level protocol violation; answered with RST_STREAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamError {
    pub stream_id: StreamId,
    pub code: ErrorCode,
}

impl StreamError {
    pub fn new(stream_id: StreamId, code: ErrorCode) -> Self {
        Self { stream_id, code }
    }

    pub fn protocol(stream_id: StreamId) -> Self {
        Self::new(stream_id, ErrorCode::ProtocolError)
    }

    pub fn closed(stream_id: StreamId) -> Self {
        Self::new(stream_id, ErrorCode::StreamClosed)
    }

    pub fn refused(stream_id: StreamId) -> Self {
        Self::new(stream_id, ErrorCode::RefusedStream)
    }

    pub fn flow_control(stream_id: StreamId) -> Self {
        Self::new(stream_id, ErrorCode::FlowControlError)
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream {} error: {}", self.stream_id, self.code)
    }
}

impl std::error::Error for StreamError {}

/// Failure of a local write operation. The stream state is unchanged
/// whenever one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Connection has not finished the settings exchange.
    NotReady,
    /// No stream with that identifier.
    StreamNotFound,
    /// The stream's send side is already closed or reset.
    InvalidState,
    /// Final response headers were already sent.
    HeadersAlreadySent,
    /// Informational headers cannot carry END_STREAM.
    InformationalEndOfStream,
    /// Attempted to write data before the final response headers.
    DataBeforeHeaders,
    /// Attempted to write trailers without any prior data write.
    TrailersWithoutData,
    /// Flow control window is empty; retry after WINDOW_UPDATE credit.
    Blocked,
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            WriteError::NotReady => "connection not ready",
            WriteError::StreamNotFound => "stream not found",
            WriteError::InvalidState => "stream cannot send in its current state",
            WriteError::HeadersAlreadySent => "final response headers already sent",
            WriteError::InformationalEndOfStream => {
                "informational headers cannot end the stream"
            }
            WriteError::DataBeforeHeaders => "attempted to write data before headers",
            WriteError::TrailersWithoutData => "attempted to write trailers without data",
            WriteError::Blocked => "flow control window exhausted",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for WriteError {}

/// True for response header lists with a 1xx status other than 101.
/// Informational responses may repeat and do not transition the stream.
fn is_informational(fields: &[HeaderField]) -> bool {
    fields
        .iter()
        .take_while(|field| field.is_pseudo())
        .any(|field| {
            field.name.as_slice() == b":status".as_slice()
                && field.value.first() == Some(&b'1')
                && field.value.as_slice() != b"101".as_slice()
        })
}

/// One HTTP/2 stream: lifecycle state, both flow control windows, and the
/// inbound header/body/trailer buffers the read surface drains.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    state: StreamState,
    send: FlowControl,
    recv: FlowControl,
    headers: Option<Vec<HeaderField>>,
    trailers: Option<Vec<HeaderField>>,
    inbound: BytesMut,
    sent_final_headers: bool,
    sent_data: bool,
}

impl Stream {
    /// Create a stream in `Idle`; the admitting HEADERS event opens it.
    pub fn idle(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send: FlowControl::new(send_window),
            recv: FlowControl::new(recv_window),
            headers: None,
            trailers: None,
            inbound: BytesMut::new(),
            sent_final_headers: false,
            sent_data: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether this stream counts against the peer's concurrency slot.
    /// Terminal and locally-reserved streams do not.
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self.state,
            StreamState::Idle
                | StreamState::Open
                | StreamState::HalfClosedLocal
                | StreamState::HalfClosedRemote
                | StreamState::ReservedRemote
        )
    }

    // Remote events.

    /// Apply the opening header block.
    pub fn recv_headers(
        &mut self,
        fields: Vec<HeaderField>,
        end_stream: bool,
    ) -> Result<(), StreamError> {
        match self.state {
            StreamState::Idle => {
                self.headers = Some(fields);
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
                Ok(())
            }
            StreamState::HalfClosedRemote | StreamState::Closed | StreamState::Reset => {
                Err(StreamError::closed(self.id))
            }
            _ => Err(StreamError::protocol(self.id)),
        }
    }

    /// Apply a second header block in the remote direction. Valid only as
    /// trailers: the block must carry END_STREAM.
    pub fn recv_trailers(
        &mut self,
        fields: Vec<HeaderField>,
        end_stream: bool,
    ) -> Result<(), StreamError> {
        if !end_stream {
            // Repeated HEADERS without END_STREAM is not a trailer block.
            return Err(StreamError::protocol(self.id));
        }
        match self.state {
            StreamState::Open => {
                self.trailers = Some(fields);
                self.state = StreamState::HalfClosedRemote;
                Ok(())
            }
            StreamState::HalfClosedLocal => {
                self.trailers = Some(fields);
                self.state = StreamState::Closed;
                Ok(())
            }
            StreamState::HalfClosedRemote | StreamState::Closed | StreamState::Reset => {
                Err(StreamError::closed(self.id))
            }
            _ => Err(StreamError::protocol(self.id)),
        }
    }

    /// Apply a DATA frame's content.
    pub fn recv_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open => {
                self.inbound.extend_from_slice(&data);
                if end_stream {
                    self.state = StreamState::HalfClosedRemote;
                }
                Ok(())
            }
            StreamState::HalfClosedLocal => {
                self.inbound.extend_from_slice(&data);
                if end_stream {
                    self.state = StreamState::Closed;
                }
                Ok(())
            }
            StreamState::HalfClosedRemote | StreamState::Closed | StreamState::Reset => {
                Err(StreamError::closed(self.id))
            }
            _ => Err(StreamError::protocol(self.id)),
        }
    }

    /// Peer reset. Terminal states are unchanged.
    pub fn recv_reset(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Reset;
        }
    }

    // Local events.

    /// Validate and apply a response header write. Informational blocks
    /// (1xx, except 101) may repeat and do not transition the state.
    pub fn send_headers(
        &mut self,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), WriteError> {
        if !matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(WriteError::InvalidState);
        }
        if self.sent_final_headers {
            return Err(WriteError::HeadersAlreadySent);
        }
        if is_informational(fields) {
            if end_stream {
                return Err(WriteError::InformationalEndOfStream);
            }
            return Ok(());
        }

        self.sent_final_headers = true;
        if end_stream {
            self.close_local();
        }
        Ok(())
    }

    /// Ordering checks for a data write, without committing anything.
    pub fn prepare_send_data(&self) -> Result<(), WriteError> {
        if !matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(WriteError::InvalidState);
        }
        if !self.sent_final_headers {
            return Err(WriteError::DataBeforeHeaders);
        }
        Ok(())
    }

    /// Commit a data write: debit the send window and transition. A
    /// zero-length write still establishes the body phase for trailers.
    pub fn commit_send_data(&mut self, len: u32, end_stream: bool) {
        self.send.debit(len);
        self.sent_data = true;
        if end_stream {
            self.close_local();
        }
    }

    /// Validate and apply a trailer write. Trailers always end the stream.
    pub fn send_trailers(&mut self) -> Result<(), WriteError> {
        if !matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(WriteError::InvalidState);
        }
        if !self.sent_data {
            return Err(WriteError::TrailersWithoutData);
        }
        self.close_local();
        Ok(())
    }

    /// Local cancel: reset and drain buffered input silently.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Reset;
        }
        self.inbound.clear();
        self.headers = None;
        self.trailers = None;
    }

    fn close_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    // Flow control plumbing.

    pub fn send_window(&self) -> i64 {
        self.send.available()
    }

    pub fn credit_send(&mut self, increment: u32) -> Result<(), StreamError> {
        self.send
            .credit(increment)
            .map_err(|_| StreamError::flow_control(self.id))
    }

    pub fn adjust_send_window(&mut self, delta: i32) {
        self.send.adjust(delta);
    }

    pub fn recv_window(&self) -> i64 {
        self.recv.available()
    }

    pub fn debit_recv(&mut self, amount: u32) {
        self.recv.debit(amount);
    }

    pub fn recv_refund_due(&self) -> bool {
        self.recv.refund_due()
    }

    pub fn take_recv_refund(&mut self) -> u32 {
        self.recv.take_refund()
    }

    // Read surface.

    /// Take the request headers, once.
    pub fn take_headers(&mut self) -> Option<Vec<HeaderField>> {
        self.headers.take()
    }

    /// Take the trailers, once available.
    pub fn take_trailers(&mut self) -> Option<Vec<HeaderField>> {
        self.trailers.take()
    }

    /// Read buffered body bytes. The flag reports end-of-stream: true
    /// once the peer closed its direction and the buffer is drained.
    pub fn read(&mut self, buf: &mut [u8]) -> (usize, bool) {
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        let _ = self.inbound.split_to(n);
        (n, self.remote_closed() && self.inbound.is_empty())
    }

    /// Bytes currently buffered and unread.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    fn remote_closed(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosedRemote | StreamState::Closed
        )
    }
}
