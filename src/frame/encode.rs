//! Frame encoding: typed frames to wire bytes.

use bytes::{BufMut, BytesMut};

use super::types::*;
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, flags};

/// Encodes HTTP/2 frames into a byte buffer.
///
/// The encoder honors the peer's SETTINGS_MAX_FRAME_SIZE: header blocks
/// larger than one frame are split into HEADERS plus CONTINUATION frames,
/// emitted contiguously.
pub struct FrameEncoder {
    max_frame_size: u32,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the peer's advertised maximum frame size.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Encode a single typed frame. The caller is responsible for keeping
    /// the payload within the frame size limit; use `write_headers` for
    /// header blocks that may need splitting.
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) {
        match frame {
            Frame::Data(f) => self.encode_data(f, buf),
            Frame::Headers(f) => self.encode_headers(f, buf),
            Frame::Priority(f) => self.encode_priority(f, buf),
            Frame::RstStream(f) => self.encode_rst_stream(f, buf),
            Frame::Settings(f) => self.encode_settings(f, buf),
            Frame::PushPromise(f) => self.encode_push_promise(f, buf),
            Frame::Ping(f) => self.encode_ping(f, buf),
            Frame::GoAway(f) => self.encode_goaway(f, buf),
            Frame::WindowUpdate(f) => self.encode_window_update(f, buf),
            Frame::Continuation(f) => self.encode_continuation(f, buf),
            Frame::Unknown(f) => self.encode_unknown(f, buf),
        }
    }

    #[inline]
    fn header(
        &self,
        buf: &mut BytesMut,
        length: u32,
        frame_type: FrameType,
        frame_flags: u8,
        stream_id: StreamId,
    ) {
        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.put_u8(frame_type as u8);
        buf.put_u8(frame_flags);
        // Reserved bit written as zero.
        buf.put_u32(stream_id.value() & 0x7FFF_FFFF);
    }

    fn encode_data(&self, frame: &DataFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.end_stream { flags::END_STREAM } else { 0 };
        self.header(
            buf,
            frame.data.len() as u32,
            FrameType::Data,
            frame_flags,
            frame.stream_id,
        );
        buf.extend_from_slice(&frame.data);
    }

    fn encode_headers(&self, frame: &HeadersFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        if frame.end_headers {
            frame_flags |= flags::END_HEADERS;
        }
        if frame.priority.is_some() {
            frame_flags |= flags::PRIORITY;
        }

        let priority_len: u32 = if frame.priority.is_some() { 5 } else { 0 };
        let length = priority_len + frame.fragment.len() as u32;
        self.header(buf, length, FrameType::Headers, frame_flags, frame.stream_id);

        if let Some(priority) = &frame.priority {
            let mut word = priority.dependency.value();
            if priority.exclusive {
                word |= 0x8000_0000;
            }
            buf.put_u32(word);
            buf.put_u8(priority.weight);
        }

        buf.extend_from_slice(&frame.fragment);
    }

    fn encode_priority(&self, frame: &PriorityFrame, buf: &mut BytesMut) {
        self.header(buf, 5, FrameType::Priority, 0, frame.stream_id);
        let mut word = frame.priority.dependency.value();
        if frame.priority.exclusive {
            word |= 0x8000_0000;
        }
        buf.put_u32(word);
        buf.put_u8(frame.priority.weight);
    }

    fn encode_rst_stream(&self, frame: &RstStreamFrame, buf: &mut BytesMut) {
        self.header(buf, 4, FrameType::RstStream, 0, frame.stream_id);
        buf.put_u32(frame.error_code);
    }

    fn encode_settings(&self, frame: &SettingsFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };
        let length = if frame.ack {
            0
        } else {
            (frame.settings.len() * 6) as u32
        };
        self.header(buf, length, FrameType::Settings, frame_flags, StreamId::CONNECTION);

        if !frame.ack {
            for setting in &frame.settings {
                buf.put_u16(setting.id.to_u16());
                buf.put_u32(setting.value);
            }
        }
    }

    fn encode_push_promise(&self, frame: &PushPromiseFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.end_headers { flags::END_HEADERS } else { 0 };
        let length = 4 + frame.fragment.len() as u32;
        self.header(buf, length, FrameType::PushPromise, frame_flags, frame.stream_id);
        buf.put_u32(frame.promised_stream_id.value() & 0x7FFF_FFFF);
        buf.extend_from_slice(&frame.fragment);
    }

    fn encode_ping(&self, frame: &PingFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };
        self.header(buf, 8, FrameType::Ping, frame_flags, StreamId::CONNECTION);
        buf.extend_from_slice(&frame.data);
    }

    fn encode_goaway(&self, frame: &GoAwayFrame, buf: &mut BytesMut) {
        let length = 8 + frame.debug_data.len() as u32;
        self.header(buf, length, FrameType::GoAway, 0, StreamId::CONNECTION);
        buf.put_u32(frame.last_stream_id.value() & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code);
        buf.extend_from_slice(&frame.debug_data);
    }

    fn encode_window_update(&self, frame: &WindowUpdateFrame, buf: &mut BytesMut) {
        self.header(buf, 4, FrameType::WindowUpdate, 0, frame.stream_id);
        buf.put_u32(frame.increment & 0x7FFF_FFFF);
    }

    fn encode_continuation(&self, frame: &ContinuationFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.end_headers { flags::END_HEADERS } else { 0 };
        self.header(
            buf,
            frame.fragment.len() as u32,
            FrameType::Continuation,
            frame_flags,
            frame.stream_id,
        );
        buf.extend_from_slice(&frame.fragment);
    }

    fn encode_unknown(&self, frame: &UnknownFrame, buf: &mut BytesMut) {
        let length = frame.payload.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.put_u8(frame.frame_type);
        buf.put_u8(frame.flags);
        buf.put_u32(frame.stream_id.value() & 0x7FFF_FFFF);
        buf.extend_from_slice(&frame.payload);
    }
}

/// Direct writers for the frames the connection emits on its own behalf.
impl FrameEncoder {
    /// Write an encoded header block as one HEADERS frame plus as many
    /// CONTINUATION frames as the block needs. The frames are emitted
    /// back to back; nothing may be interleaved between them.
    pub fn write_headers(
        &self,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
        buf: &mut BytesMut,
    ) {
        let max = self.max_frame_size as usize;
        let first_len = block.len().min(max);
        let (first, mut rest) = block.split_at(first_len);

        let mut frame_flags = 0u8;
        if end_stream {
            frame_flags |= flags::END_STREAM;
        }
        if rest.is_empty() {
            frame_flags |= flags::END_HEADERS;
        }
        self.header(buf, first.len() as u32, FrameType::Headers, frame_flags, stream_id);
        buf.extend_from_slice(first);

        while !rest.is_empty() {
            let chunk_len = rest.len().min(max);
            let (chunk, remainder) = rest.split_at(chunk_len);
            rest = remainder;

            let cont_flags = if rest.is_empty() { flags::END_HEADERS } else { 0 };
            self.header(
                buf,
                chunk.len() as u32,
                FrameType::Continuation,
                cont_flags,
                stream_id,
            );
            buf.extend_from_slice(chunk);
        }
    }

    pub fn write_settings(&self, settings: &[Setting], buf: &mut BytesMut) {
        self.encode_settings(
            &SettingsFrame {
                ack: false,
                settings: settings.to_vec(),
            },
            buf,
        );
    }

    pub fn write_settings_ack(&self, buf: &mut BytesMut) {
        self.encode_settings(
            &SettingsFrame {
                ack: true,
                settings: Vec::new(),
            },
            buf,
        );
    }

    pub fn write_ping_ack(&self, data: [u8; 8], buf: &mut BytesMut) {
        self.encode_ping(&PingFrame { ack: true, data }, buf);
    }

    pub fn write_rst_stream(&self, stream_id: StreamId, error_code: u32, buf: &mut BytesMut) {
        self.encode_rst_stream(
            &RstStreamFrame {
                stream_id,
                error_code,
            },
            buf,
        );
    }

    pub fn write_window_update(&self, stream_id: StreamId, increment: u32, buf: &mut BytesMut) {
        self.encode_window_update(
            &WindowUpdateFrame {
                stream_id,
                increment,
            },
            buf,
        );
    }

    pub fn write_goaway(
        &self,
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: &[u8],
        buf: &mut BytesMut,
    ) {
        self.encode_goaway(
            &GoAwayFrame {
                last_stream_id,
                error_code,
                debug_data: bytes::Bytes::copy_from_slice(debug_data),
            },
            buf,
        );
    }
}
