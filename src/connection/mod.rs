//! The connection arbiter.
//!
//! A [`ServerConnection`] owns the read side of one HTTP/2 connection:
//! it validates the client preface, decodes frames, assembles header
//! blocks, admits streams, and routes events to their state machines.
//! Writes from all streams funnel through its single output buffer, so
//! frame emission is serialized and a HEADERS + CONTINUATION chain is
//! never interleaved with other frames.
//!
//! Error classification follows Section 5.4: a stream error resets the
//! offending stream and the loop continues; a connection error emits
//! GOAWAY with the highest admitted stream id and closes.

mod assembler;
mod flow_control;
mod registry;
mod settings;
mod stream;

pub use assembler::HeaderBlock;
pub use flow_control::FlowControl;
pub use settings::ConnectionSettings;
pub use stream::{Stream, StreamError, StreamState, WriteError};

use assembler::HeaderAssembler;
use registry::{Admission, StreamRegistry};

use crate::frame::{
    self, ContinuationFrame, DataFrame, ErrorCode, Frame, FrameDecoder, FrameEncoder, FrameError,
    GoAwayFrame, HeadersFrame, PingFrame, RstStreamFrame, Setting, SettingId, SettingsFrame,
    StreamId, WindowUpdateFrame,
};
use crate::hpack::{HeaderDecoder, HeaderEncoder, HeaderField, HpackDecoder, HpackEncoder};

use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the 24-octet client magic.
    WaitingPreface,
    /// Preface seen, our SETTINGS sent, waiting for the client's.
    WaitingSettings,
    /// Settings exchanged; streams may be admitted.
    Open,
    /// GOAWAY sent or received; existing streams drain, no new ones.
    Draining,
    /// Unrecoverable; the transport should be closed.
    Closed,
}

/// A connection-fatal protocol violation: code plus human-readable cause.
/// Unwinds the connection via GOAWAY.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    code: ErrorCode,
    message: String,
}

impl ConnectionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolError, message)
    }

    pub fn compression(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CompressionError, message)
    }

    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FlowControlError, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ConnectionError {}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::new(e.error_code(), e.to_string())
    }
}

/// Classified protocol violation, for `?` inside frame handlers.
#[derive(Debug)]
pub(crate) enum Fault {
    Connection(ConnectionError),
    Stream(StreamError),
}

impl From<ConnectionError> for Fault {
    fn from(e: ConnectionError) -> Self {
        Fault::Connection(e)
    }
}

impl From<StreamError> for Fault {
    fn from(e: StreamError) -> Self {
        Fault::Stream(e)
    }
}

impl From<FrameError> for Fault {
    fn from(e: FrameError) -> Self {
        Fault::Connection(e.into())
    }
}

/// Admission verdict returned by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDecision {
    Accept,
    Refuse,
}

/// Application hook for newly admitted streams.
///
/// Invoked after the header block is complete and the stream has passed
/// admission checks; the decision is synchronous with frame dispatch.
/// With no listener installed every stream is refused.
pub trait StreamListener {
    fn on_stream(&mut self, stream_id: StreamId, request: &HeaderBlock) -> StreamDecision;
}

impl<F> StreamListener for F
where
    F: FnMut(StreamId, &HeaderBlock) -> StreamDecision,
{
    fn on_stream(&mut self, stream_id: StreamId, request: &HeaderBlock) -> StreamDecision {
        self(stream_id, request)
    }
}

/// Events surfaced to the embedding layer.
#[derive(Debug)]
pub enum ServerEvent {
    /// Settings exchange finished; requests may arrive.
    Ready,
    /// A stream was admitted and its request headers are readable.
    StreamOpened {
        stream_id: StreamId,
        end_stream: bool,
    },
    /// Body bytes were buffered on a stream.
    Data {
        stream_id: StreamId,
        end_stream: bool,
    },
    /// Trailers arrived and are readable.
    Trailers { stream_id: StreamId },
    /// The client reset a stream.
    StreamReset {
        stream_id: StreamId,
        code: ErrorCode,
    },
    /// The client is going away.
    GoAway {
        last_stream_id: StreamId,
        code: ErrorCode,
    },
    /// The connection failed; GOAWAY has been queued.
    ConnectionError(ConnectionError),
}

/// Server side of one HTTP/2 connection.
///
/// Sans-IO: the embedder feeds received bytes in with [`feed`] and
/// shuttles [`pending_send`] back out to the transport.
///
/// [`feed`]: ServerConnection::feed
/// [`pending_send`]: ServerConnection::pending_send
pub struct ServerConnection {
    state: ConnectionState,
    local_settings: ConnectionSettings,
    remote_settings: ConnectionSettings,
    got_preface: bool,
    got_settings: bool,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    header_decoder: Box<dyn HeaderDecoder>,
    header_encoder: Box<dyn HeaderEncoder>,
    listener: Option<Box<dyn StreamListener>>,
    registry: StreamRegistry,
    /// Connection-scope send window, credited by client WINDOW_UPDATEs.
    send_flow: FlowControl,
    /// Connection-scope receive window, refunded as frames are consumed.
    recv_flow: FlowControl,
    /// Header block under assembly; while set, only CONTINUATION frames
    /// for its stream are accepted.
    assembler: Option<HeaderAssembler>,
    /// Set once we have told the client to stop opening streams.
    goaway_sent: bool,
    write_buf: BytesMut,
    read_buf: BytesMut,
    events: Vec<ServerEvent>,
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConnection {
    pub fn new() -> Self {
        Self::with_settings(ConnectionSettings::default())
    }

    pub fn with_settings(settings: ConnectionSettings) -> Self {
        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_size(settings.max_frame_size);

        let mut header_decoder = HpackDecoder::new();
        header_decoder.set_max_table_size(settings.header_table_size as usize);

        Self {
            state: ConnectionState::WaitingPreface,
            local_settings: settings,
            remote_settings: ConnectionSettings::default(),
            got_preface: false,
            got_settings: false,
            decoder,
            encoder: FrameEncoder::new(),
            header_decoder: Box::new(header_decoder),
            header_encoder: Box::new(HpackEncoder::new()),
            listener: None,
            registry: StreamRegistry::new(settings.max_concurrent_streams),
            send_flow: FlowControl::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            recv_flow: FlowControl::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            assembler: None,
            goaway_sent: false,
            write_buf: BytesMut::with_capacity(16_384),
            read_buf: BytesMut::with_capacity(16_384),
            events: Vec::new(),
        }
    }

    /// Install the admission listener.
    pub fn set_listener(&mut self, listener: Box<dyn StreamListener>) {
        self.listener = Some(listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Streams currently holding a concurrency slot.
    pub fn active_streams(&self) -> u32 {
        self.registry.active_remote()
    }

    // Read side.

    /// Feed bytes received from the transport and process every complete
    /// frame they finish. Protocol failures surface as events and queued
    /// RST_STREAM/GOAWAY frames, never as a return value.
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
        self.process();
    }

    fn process(&mut self) {
        if self.state == ConnectionState::Closed {
            self.read_buf.clear();
            return;
        }

        if !self.got_preface {
            if self.read_buf.len() < frame::CONNECTION_PREFACE.len() {
                return;
            }
            if &self.read_buf[..frame::CONNECTION_PREFACE.len()] != frame::CONNECTION_PREFACE {
                self.fail(ConnectionError::protocol("invalid connection preface"));
                return;
            }
            let _ = self.read_buf.split_to(frame::CONNECTION_PREFACE.len());
            self.got_preface = true;
            self.send_settings();
        }

        while self.state != ConnectionState::Closed {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => {
                    if let Err(fault) = self.handle_frame(frame) {
                        self.fault(fault);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.fail(e.into());
                    break;
                }
            }
        }
    }

    fn send_settings(&mut self) {
        let settings = [
            Setting {
                id: SettingId::MaxConcurrentStreams,
                value: self.local_settings.max_concurrent_streams,
            },
            Setting {
                id: SettingId::InitialWindowSize,
                value: self.local_settings.initial_window_size,
            },
            Setting {
                id: SettingId::MaxFrameSize,
                value: self.local_settings.max_frame_size,
            },
            Setting {
                id: SettingId::MaxHeaderListSize,
                value: self.local_settings.max_header_list_size,
            },
        ];
        self.encoder.write_settings(&settings, &mut self.write_buf);
        self.state = ConnectionState::WaitingSettings;
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), Fault> {
        // A header block in progress admits nothing but its own
        // CONTINUATION frames (Section 4.3).
        if self.assembler.is_some() {
            return match frame {
                Frame::Continuation(f) => self.handle_continuation(f),
                _ => Err(ConnectionError::protocol(
                    "header block interrupted by another frame",
                )
                .into()),
            };
        }

        match frame {
            Frame::Settings(f) => self.handle_settings(f),
            Frame::Ping(f) => self.handle_ping(f),
            Frame::GoAway(f) => self.handle_goaway(f),
            Frame::WindowUpdate(f) => self.handle_window_update(f),
            Frame::Headers(f) => self.handle_headers(f),
            Frame::Data(f) => self.handle_data(f),
            Frame::RstStream(f) => self.handle_rst_stream(f),
            // Reprioritization is not implemented; records on HEADERS are
            // still surfaced through the assembled block.
            Frame::Priority(_) => Ok(()),
            Frame::PushPromise(_) => {
                Err(ConnectionError::protocol("PUSH_PROMISE from client").into())
            }
            Frame::Continuation(_) => {
                Err(ConnectionError::protocol("CONTINUATION without a header block").into())
            }
            Frame::Unknown(_) => Ok(()),
        }
    }

    fn handle_headers(&mut self, frame: HeadersFrame) -> Result<(), Fault> {
        let assembler =
            HeaderAssembler::begin(&frame, self.local_settings.max_header_list_size)
                .map_err(Fault::Connection)?;
        if assembler.is_done() {
            self.complete_header_block(assembler)
        } else {
            self.assembler = Some(assembler);
            Ok(())
        }
    }

    fn handle_continuation(&mut self, frame: ContinuationFrame) -> Result<(), Fault> {
        let Some(mut assembler) = self.assembler.take() else {
            return Err(ConnectionError::protocol("CONTINUATION without a header block").into());
        };
        assembler.push(&frame).map_err(Fault::Connection)?;
        if assembler.is_done() {
            self.complete_header_block(assembler)
        } else {
            self.assembler = Some(assembler);
            Ok(())
        }
    }

    fn complete_header_block(&mut self, assembler: HeaderAssembler) -> Result<(), Fault> {
        let stream_id = assembler.stream_id();
        let block = assembler
            .finish(
                &mut *self.header_decoder,
                self.local_settings.max_header_list_size,
            )
            .map_err(Fault::Connection)?;

        match self.registry.admit(stream_id)? {
            Admission::Existing => {
                let HeaderBlock {
                    fields, end_stream, ..
                } = block;
                if let Some(result) = self
                    .registry
                    .apply(stream_id, |s| s.recv_trailers(fields, end_stream))
                {
                    result?;
                    self.events.push(ServerEvent::Trailers { stream_id });
                }
                Ok(())
            }
            Admission::New => {
                // Streams opened after our GOAWAY are past last_stream_id
                // and get refused rather than processed.
                if self.goaway_sent {
                    return Err(StreamError::refused(stream_id).into());
                }
                let decision = match self.listener.as_mut() {
                    Some(listener) => listener.on_stream(stream_id, &block),
                    None => StreamDecision::Refuse,
                };
                if decision == StreamDecision::Refuse {
                    debug!(stream = %stream_id, "stream refused");
                    return Err(StreamError::refused(stream_id).into());
                }

                let HeaderBlock {
                    fields, end_stream, ..
                } = block;
                let mut stream = Stream::idle(
                    stream_id,
                    self.remote_settings.initial_window_size,
                    self.local_settings.initial_window_size,
                );
                stream.recv_headers(fields, end_stream)?;
                self.registry.insert(stream);
                debug!(stream = %stream_id, end_stream, "stream admitted");
                self.events.push(ServerEvent::StreamOpened {
                    stream_id,
                    end_stream,
                });
                Ok(())
            }
        }
    }

    fn handle_data(&mut self, frame: DataFrame) -> Result<(), Fault> {
        let stream_id = frame.stream_id;

        // Connection-scope accounting covers every DATA octet on the
        // wire: content, the pad length octet, and the padding itself.
        if i64::from(frame.flow_len) > self.recv_flow.available() {
            return Err(
                ConnectionError::flow_control("connection receive window exceeded").into(),
            );
        }
        self.recv_flow.debit(frame.flow_len);
        if self.recv_flow.refund_due() {
            let refund = self.recv_flow.take_refund();
            self.encoder
                .write_window_update(StreamId::CONNECTION, refund, &mut self.write_buf);
        }

        let state = self.registry.get(stream_id).map(|s| s.state());
        match state {
            // Unknown below the high-water mark reads as closed: the
            // octets were charged to the connection window and otherwise
            // ignored.
            None if self.registry.is_forgotten(stream_id) => Ok(()),
            None => Err(ConnectionError::protocol("DATA on idle stream").into()),
            // Terminal streams keep their window out of play; octets are
            // charged to the connection window only.
            Some(state) if state.is_terminal() => Ok(()),
            Some(_) => {
                if let Some(window) = self.registry.get(stream_id).map(|s| s.recv_window())
                    && i64::from(frame.flow_len) > window
                {
                    return Err(StreamError::flow_control(stream_id).into());
                }

                let end_stream = frame.end_stream;
                let flow_len = frame.flow_len;
                let data = frame.data;
                if let Some(result) = self.registry.apply(stream_id, |s| {
                    s.debit_recv(flow_len);
                    s.recv_data(data, end_stream)
                }) {
                    result?;
                }

                if let Some(stream) = self.registry.get_mut(stream_id)
                    && matches!(
                        stream.state(),
                        StreamState::Open | StreamState::HalfClosedLocal
                    )
                    && stream.recv_refund_due()
                {
                    let refund = stream.take_recv_refund();
                    self.encoder
                        .write_window_update(stream_id, refund, &mut self.write_buf);
                }

                self.events.push(ServerEvent::Data {
                    stream_id,
                    end_stream,
                });
                Ok(())
            }
        }
    }

    fn handle_rst_stream(&mut self, frame: RstStreamFrame) -> Result<(), Fault> {
        let stream_id = frame.stream_id;
        if self.registry.get(stream_id).is_some() {
            self.registry.apply(stream_id, |s| s.recv_reset());
            self.events.push(ServerEvent::StreamReset {
                stream_id,
                code: ErrorCode::from_u32(frame.error_code),
            });
            Ok(())
        } else if self.registry.is_forgotten(stream_id) || !stream_id.is_client_initiated() {
            // Late reset for a stream already released; nothing to do.
            Ok(())
        } else {
            Err(ConnectionError::protocol("RST_STREAM on idle stream").into())
        }
    }

    fn handle_settings(&mut self, frame: SettingsFrame) -> Result<(), Fault> {
        if frame.ack {
            return Ok(());
        }

        for setting in &frame.settings {
            match setting.id {
                SettingId::HeaderTableSize => {
                    self.remote_settings.header_table_size = setting.value;
                    self.header_encoder.set_max_table_size(setting.value as usize);
                }
                SettingId::EnablePush => {
                    self.remote_settings.enable_push = setting.value == 1;
                }
                SettingId::MaxConcurrentStreams => {
                    self.remote_settings.max_concurrent_streams = setting.value;
                }
                SettingId::InitialWindowSize => {
                    let delta = (i64::from(setting.value)
                        - i64::from(self.remote_settings.initial_window_size))
                        as i32;
                    self.remote_settings.initial_window_size = setting.value;
                    // Applies to every stream's send window, possibly
                    // driving it negative (Section 6.9.2).
                    for stream in self.registry.streams_mut() {
                        stream.adjust_send_window(delta);
                    }
                }
                SettingId::MaxFrameSize => {
                    self.remote_settings.max_frame_size = setting.value;
                    self.encoder.set_max_frame_size(setting.value);
                }
                SettingId::MaxHeaderListSize => {
                    self.remote_settings.max_header_list_size = setting.value;
                }
                SettingId::Unknown(_) => {}
            }
        }

        self.encoder.write_settings_ack(&mut self.write_buf);

        if !self.got_settings {
            self.got_settings = true;
            self.state = ConnectionState::Open;
            self.events.push(ServerEvent::Ready);
            debug!("settings exchanged, connection open");
        }
        Ok(())
    }

    fn handle_ping(&mut self, frame: PingFrame) -> Result<(), Fault> {
        if !frame.ack {
            self.encoder.write_ping_ack(frame.data, &mut self.write_buf);
        }
        Ok(())
    }

    fn handle_goaway(&mut self, frame: GoAwayFrame) -> Result<(), Fault> {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Draining;
        }
        self.events.push(ServerEvent::GoAway {
            last_stream_id: frame.last_stream_id,
            code: ErrorCode::from_u32(frame.error_code),
        });
        Ok(())
    }

    fn handle_window_update(&mut self, frame: WindowUpdateFrame) -> Result<(), Fault> {
        if frame.stream_id.is_connection() {
            return self
                .send_flow
                .credit(frame.increment)
                .map_err(|_| {
                    ConnectionError::flow_control("connection send window overflow").into()
                });
        }

        if self.registry.get(frame.stream_id).is_some() {
            if let Some(result) = self
                .registry
                .apply(frame.stream_id, |s| s.credit_send(frame.increment))
            {
                result?;
            }
            Ok(())
        } else if self.registry.is_forgotten(frame.stream_id)
            || !frame.stream_id.is_client_initiated()
        {
            // Credit for a finished stream may arrive late; ignore it.
            Ok(())
        } else {
            Err(ConnectionError::protocol("WINDOW_UPDATE on idle stream").into())
        }
    }

    // Error classification (Section 5.4).

    fn fault(&mut self, fault: Fault) {
        match fault {
            Fault::Stream(e) => {
                debug!(stream = %e.stream_id, code = %e.code, "resetting stream");
                self.encoder
                    .write_rst_stream(e.stream_id, e.code.to_u32(), &mut self.write_buf);
                self.registry.apply(e.stream_id, |s| s.recv_reset());
            }
            Fault::Connection(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: ConnectionError) {
        if self.state == ConnectionState::Closed {
            return;
        }
        debug!(code = %error.code(), message = error.message(), "connection failed");
        self.encoder.write_goaway(
            self.registry.highest_remote_id(),
            error.code().to_u32(),
            error.message().as_bytes(),
            &mut self.write_buf,
        );
        self.goaway_sent = true;
        self.state = ConnectionState::Closed;
        self.events.push(ServerEvent::ConnectionError(error));
    }

    // Write side: the application-facing stream operations.

    fn ensure_open(&self) -> Result<(), WriteError> {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Draining) {
            Ok(())
        } else {
            Err(WriteError::NotReady)
        }
    }

    /// Send response headers. Informational blocks (1xx, except 101) may
    /// repeat before the final block.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), WriteError> {
        self.ensure_open()?;
        match self.registry.apply(stream_id, |s| s.send_headers(fields, end_stream)) {
            None => Err(WriteError::StreamNotFound),
            Some(Err(e)) => Err(e),
            Some(Ok(())) => {
                let block = self.header_encoder.encode_block(fields);
                self.encoder
                    .write_headers(stream_id, &block, end_stream, &mut self.write_buf);
                Ok(())
            }
        }
    }

    /// Send body bytes, bounded by both send windows, split across DATA
    /// frames as needed. Returns the number of bytes accepted; fewer than
    /// `data.len()` means flow control intervened and END_STREAM was
    /// withheld. Zero window with pending bytes reports `Blocked`.
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: &[u8],
        end_stream: bool,
    ) -> Result<usize, WriteError> {
        self.ensure_open()?;
        let stream = self
            .registry
            .get(stream_id)
            .ok_or(WriteError::StreamNotFound)?;
        stream.prepare_send_data()?;

        let available = self
            .send_flow
            .available()
            .min(stream.send_window())
            .max(0) as usize;
        let to_send = data.len().min(available);
        if to_send == 0 && !data.is_empty() {
            return Err(WriteError::Blocked);
        }
        let is_end = end_stream && to_send == data.len();

        self.send_flow.debit(to_send as u32);
        self.registry
            .apply(stream_id, |s| s.commit_send_data(to_send as u32, is_end));

        if to_send == 0 {
            // Zero-length DATA still travels, carrying END_STREAM when
            // requested.
            self.encoder.encode(
                &Frame::Data(DataFrame::new(stream_id, Bytes::new(), is_end)),
                &mut self.write_buf,
            );
            return Ok(0);
        }

        let max_frame = self.encoder.max_frame_size() as usize;
        let mut offset = 0;
        while offset < to_send {
            let end = (offset + max_frame).min(to_send);
            let frame = DataFrame::new(
                stream_id,
                Bytes::copy_from_slice(&data[offset..end]),
                is_end && end == to_send,
            );
            self.encoder.encode(&Frame::Data(frame), &mut self.write_buf);
            offset = end;
        }
        Ok(to_send)
    }

    /// Send trailers; they always carry END_STREAM.
    pub fn send_trailers(
        &mut self,
        stream_id: StreamId,
        fields: &[HeaderField],
    ) -> Result<(), WriteError> {
        self.ensure_open()?;
        match self.registry.apply(stream_id, |s| s.send_trailers()) {
            None => Err(WriteError::StreamNotFound),
            Some(Err(e)) => Err(e),
            Some(Ok(())) => {
                let block = self.header_encoder.encode_block(fields);
                self.encoder
                    .write_headers(stream_id, &block, true, &mut self.write_buf);
                Ok(())
            }
        }
    }

    /// Cancel a stream: RST_STREAM with CANCEL, state moves to `Reset`,
    /// buffered input is discarded. A no-op on terminal streams.
    pub fn cancel_stream(&mut self, stream_id: StreamId) -> Result<(), WriteError> {
        let Some(state) = self.registry.get(stream_id).map(|s| s.state()) else {
            return Err(WriteError::StreamNotFound);
        };
        if !state.is_terminal() {
            debug!(stream = %stream_id, "stream cancelled");
            self.encoder.write_rst_stream(
                stream_id,
                ErrorCode::Cancel.to_u32(),
                &mut self.write_buf,
            );
            self.registry.apply(stream_id, |s| s.cancel());
        }
        Ok(())
    }

    /// Shut the connection down: cancel every live stream, then GOAWAY.
    pub fn shutdown(&mut self, code: ErrorCode) {
        if self.state == ConnectionState::Closed {
            return;
        }
        for stream_id in self.registry.slot_holders() {
            self.encoder.write_rst_stream(
                stream_id,
                ErrorCode::Cancel.to_u32(),
                &mut self.write_buf,
            );
            self.registry.apply(stream_id, |s| s.cancel());
        }
        debug!(code = %code, "connection shutting down");
        self.encoder.write_goaway(
            self.registry.highest_remote_id(),
            code.to_u32(),
            &[],
            &mut self.write_buf,
        );
        self.goaway_sent = true;
        self.state = ConnectionState::Draining;
    }

    // Read surface for admitted streams.

    /// Take the request headers, once.
    pub fn read_headers(&mut self, stream_id: StreamId) -> Option<Vec<HeaderField>> {
        self.registry.get_mut(stream_id)?.take_headers()
    }

    /// Read buffered body bytes; the flag reports end-of-stream.
    pub fn read(
        &mut self,
        stream_id: StreamId,
        buf: &mut [u8],
    ) -> Result<(usize, bool), WriteError> {
        self.registry
            .get_mut(stream_id)
            .map(|s| s.read(buf))
            .ok_or(WriteError::StreamNotFound)
    }

    /// Take the trailers, once they have arrived.
    pub fn read_trailers(&mut self, stream_id: StreamId) -> Option<Vec<HeaderField>> {
        self.registry.get_mut(stream_id)?.take_trailers()
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.registry.get(stream_id).map(|s| s.state())
    }

    /// Drop the registry entry for a finished stream. Identifiers are
    /// monotonic, so the slot can never be resurrected.
    pub fn release_stream(&mut self, stream_id: StreamId) {
        self.registry.release(stream_id);
    }

    // Wire surface.

    /// Drain pending events.
    pub fn poll_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Bytes queued for the transport.
    pub fn pending_send(&self) -> &[u8] {
        &self.write_buf
    }

    /// Mark `n` bytes of [`pending_send`] as written.
    ///
    /// [`pending_send`]: ServerConnection::pending_send
    pub fn advance_send(&mut self, n: usize) {
        let _ = self.write_buf.split_to(n);
    }

    pub fn has_pending_send(&self) -> bool {
        !self.write_buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::HpackEncoder as TestEncoder;

    fn encode_block(fields: &[HeaderField]) -> Vec<u8> {
        TestEncoder::new().encode_block(fields)
    }

    fn ready_connection() -> ServerConnection {
        let mut conn = ServerConnection::new();
        conn.set_listener(Box::new(|_: StreamId, _: &HeaderBlock| StreamDecision::Accept));
        handshake(&mut conn);
        conn
    }

    fn handshake(conn: &mut ServerConnection) {
        conn.feed(frame::CONNECTION_PREFACE);
        let mut buf = BytesMut::new();
        FrameEncoder::new().write_settings(&[], &mut buf);
        conn.feed(&buf);
        conn.advance_send(conn.pending_send().len());
        let _ = conn.poll_events();
    }

    fn feed_headers(conn: &mut ServerConnection, stream: u32, fields: &[HeaderField], eos: bool) {
        let block = encode_block(fields);
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::Headers(HeadersFrame {
                stream_id: StreamId::new(stream),
                end_stream: eos,
                end_headers: true,
                priority: None,
                fragment: Bytes::from(block),
            }),
            &mut buf,
        );
        conn.feed(&buf);
    }

    fn sent_frames(conn: &mut ServerConnection) -> Vec<Frame> {
        let mut buf = BytesMut::from(conn.pending_send());
        conn.advance_send(conn.pending_send().len());
        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_size(16_777_215);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn preface_then_settings_opens_connection() {
        let mut conn = ServerConnection::new();
        assert_eq!(conn.state(), ConnectionState::WaitingPreface);

        conn.feed(frame::CONNECTION_PREFACE);
        assert_eq!(conn.state(), ConnectionState::WaitingSettings);
        // Our settings went out with the preface acknowledgment.
        let frames = sent_frames(&mut conn);
        assert!(matches!(&frames[0], Frame::Settings(f) if !f.ack));

        let mut buf = BytesMut::new();
        FrameEncoder::new().write_settings(&[], &mut buf);
        conn.feed(&buf);
        assert!(conn.is_ready());

        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(e, ServerEvent::Ready)));
        let frames = sent_frames(&mut conn);
        assert!(matches!(&frames[0], Frame::Settings(f) if f.ack));
    }

    #[test]
    fn partial_preface_waits() {
        let mut conn = ServerConnection::new();
        conn.feed(&frame::CONNECTION_PREFACE[..10]);
        assert_eq!(conn.state(), ConnectionState::WaitingPreface);
        assert!(!conn.has_pending_send());

        conn.feed(&frame::CONNECTION_PREFACE[10..]);
        assert_eq!(conn.state(), ConnectionState::WaitingSettings);
    }

    #[test]
    fn bad_preface_is_fatal() {
        let mut conn = ServerConnection::new();
        conn.feed(b"GET / HTTP/1.1\r\nHost: x\r\n");
        assert_eq!(conn.state(), ConnectionState::Closed);
        let events = conn.poll_events();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ServerEvent::ConnectionError(_)))
        );
    }

    #[test]
    fn ping_is_acked_with_same_payload() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::Ping(PingFrame {
                ack: false,
                data: [1, 2, 3, 4, 5, 6, 7, 8],
            }),
            &mut buf,
        );
        conn.feed(&buf);

        let frames = sent_frames(&mut conn);
        assert!(
            matches!(&frames[0], Frame::Ping(f) if f.ack && f.data == [1, 2, 3, 4, 5, 6, 7, 8])
        );
    }

    #[test]
    fn ping_ack_is_ignored() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::Ping(PingFrame {
                ack: true,
                data: [0; 8],
            }),
            &mut buf,
        );
        conn.feed(&buf);
        assert!(!conn.has_pending_send());
    }

    #[test]
    fn goaway_moves_to_draining() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        FrameEncoder::new().write_goaway(StreamId::CONNECTION, 0, b"", &mut buf);
        conn.feed(&buf);

        assert_eq!(conn.state(), ConnectionState::Draining);
        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(e, ServerEvent::GoAway { .. })));
    }

    #[test]
    fn push_promise_from_client_is_fatal() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        // Hand-built PUSH_PROMISE: promised stream 2, no fragment.
        buf.extend_from_slice(&[0, 0, 4, 0x5, 0x4, 0, 0, 0, 1, 0, 0, 0, 2]);
        conn.feed(&buf);

        assert_eq!(conn.state(), ConnectionState::Closed);
        let frames = sent_frames(&mut conn);
        assert!(matches!(
            frames.last(),
            Some(Frame::GoAway(f)) if f.error_code == ErrorCode::ProtocolError.to_u32()
        ));
    }

    #[test]
    fn stray_continuation_is_fatal() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::Continuation(ContinuationFrame {
                stream_id: StreamId::new(1),
                end_headers: true,
                fragment: Bytes::from_static(&[0x82]),
            }),
            &mut buf,
        );
        conn.feed(&buf);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn non_continuation_mid_block_is_fatal() {
        let mut conn = ready_connection();
        // HEADERS without END_HEADERS, then a PING.
        let block = encode_block(&[HeaderField::new(":method", "GET")]);
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::Headers(HeadersFrame {
                stream_id: StreamId::new(1),
                end_stream: false,
                end_headers: false,
                priority: None,
                fragment: Bytes::from(block),
            }),
            &mut buf,
        );
        FrameEncoder::new().encode(
            &Frame::Ping(PingFrame {
                ack: false,
                data: [0; 8],
            }),
            &mut buf,
        );
        conn.feed(&buf);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn unknown_frames_are_ignored() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 3, 0xcc, 0, 0, 0, 0, 7, 1, 2, 3]);
        conn.feed(&buf);

        assert!(conn.is_ready());
        assert!(conn.poll_events().is_empty());
        assert!(!conn.has_pending_send());
    }

    #[test]
    fn no_listener_refuses_streams() {
        let mut conn = ServerConnection::new();
        handshake(&mut conn);
        feed_headers(&mut conn, 1, &[HeaderField::new(":method", "GET")], false);

        let frames = sent_frames(&mut conn);
        assert!(matches!(
            &frames[0],
            Frame::RstStream(f)
                if f.stream_id.value() == 1 && f.error_code == ErrorCode::RefusedStream.to_u32()
        ));
        assert_eq!(conn.active_streams(), 0);
    }

    #[test]
    fn settings_initial_window_delta_applies_to_streams() {
        let mut conn = ready_connection();
        feed_headers(&mut conn, 1, &[HeaderField::new(":method", "GET")], false);
        let _ = sent_frames(&mut conn);

        let mut buf = BytesMut::new();
        FrameEncoder::new().write_settings(
            &[Setting {
                id: SettingId::InitialWindowSize,
                value: 1_000,
            }],
            &mut buf,
        );
        conn.feed(&buf);

        // 65_535 - (65_535 - 1_000) = 1_000.
        let stream_window = conn.registry.get(StreamId::new(1)).unwrap().send_window();
        assert_eq!(stream_window, 1_000);

        // Send side now tightly bounded.
        conn.send_headers(StreamId::new(1), &[HeaderField::new(":status", "200")], false)
            .unwrap();
        let written = conn
            .send_data(StreamId::new(1), &vec![0u8; 4_000], true)
            .unwrap();
        assert_eq!(written, 1_000);
    }

    #[test]
    fn window_update_credits_connection_send_window() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        FrameEncoder::new().write_window_update(StreamId::CONNECTION, 10_000, &mut buf);
        conn.feed(&buf);
        assert_eq!(conn.send_flow.available(), 65_535 + 10_000);
    }

    #[test]
    fn connection_window_overflow_is_fatal() {
        let mut conn = ready_connection();
        let mut buf = BytesMut::new();
        FrameEncoder::new().write_window_update(StreamId::CONNECTION, 0x7FFF_FFFF, &mut buf);
        conn.feed(&buf);
        assert_eq!(conn.state(), ConnectionState::Closed);
        let frames = sent_frames(&mut conn);
        assert!(matches!(
            frames.last(),
            Some(Frame::GoAway(f)) if f.error_code == ErrorCode::FlowControlError.to_u32()
        ));
    }

    #[test]
    fn shutdown_cancels_live_streams() {
        let mut conn = ready_connection();
        feed_headers(&mut conn, 1, &[HeaderField::new(":method", "GET")], false);
        feed_headers(&mut conn, 3, &[HeaderField::new(":method", "GET")], false);
        let _ = sent_frames(&mut conn);

        conn.shutdown(ErrorCode::NoError);
        assert_eq!(conn.state(), ConnectionState::Draining);
        assert_eq!(conn.stream_state(StreamId::new(1)), Some(StreamState::Reset));
        assert_eq!(conn.stream_state(StreamId::new(3)), Some(StreamState::Reset));

        let frames = sent_frames(&mut conn);
        let resets = frames
            .iter()
            .filter(|f| matches!(f, Frame::RstStream(r) if r.error_code == ErrorCode::Cancel.to_u32()))
            .count();
        assert_eq!(resets, 2);
        assert!(matches!(
            frames.last(),
            Some(Frame::GoAway(f)) if f.last_stream_id.value() == 3
        ));
    }

    #[test]
    fn release_stream_drops_registry_entry() {
        let mut conn = ready_connection();
        feed_headers(&mut conn, 1, &[HeaderField::new(":method", "GET")], true);
        assert!(conn.stream_state(StreamId::new(1)).is_some());

        conn.send_headers(StreamId::new(1), &[HeaderField::new(":status", "200")], true)
            .unwrap();
        assert_eq!(conn.stream_state(StreamId::new(1)), Some(StreamState::Closed));

        conn.release_stream(StreamId::new(1));
        assert!(conn.stream_state(StreamId::new(1)).is_none());
    }
}
