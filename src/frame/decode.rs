//! Frame decoding: wire bytes to typed frames.

use bytes::{Buf, Bytes, BytesMut};

use super::error::FrameError;
use super::types::*;
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, flags};

/// Decodes HTTP/2 frames out of a byte buffer.
///
/// The decoder is sans-IO: `decode` consumes a complete frame from the
/// front of the buffer or reports that more bytes are needed.
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the advertised SETTINGS_MAX_FRAME_SIZE to enforce on peers.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Decode one frame.
    ///
    /// Returns `Ok(None)` until the buffer holds the 9-octet header plus
    /// the full payload. On success the frame's bytes are consumed from
    /// the buffer. Errors are connection-fatal.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = read_header(buf);

        // Length is validated before waiting for the payload so an
        // oversized frame fails immediately (Section 4.2).
        if header.length > self.max_frame_size {
            return Err(FrameError::TooLarge {
                length: header.length,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();

        self.parse(header, payload).map(Some)
    }

    fn parse(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        match header.frame_type() {
            Some(FrameType::Data) => parse_data(header, payload),
            Some(FrameType::Headers) => parse_headers(header, payload),
            Some(FrameType::Priority) => parse_priority(header, payload),
            Some(FrameType::RstStream) => parse_rst_stream(header, payload),
            Some(FrameType::Settings) => parse_settings(header, payload),
            Some(FrameType::PushPromise) => parse_push_promise(header, payload),
            Some(FrameType::Ping) => parse_ping(header, payload),
            Some(FrameType::GoAway) => parse_goaway(header, payload),
            Some(FrameType::WindowUpdate) => parse_window_update(header, payload),
            Some(FrameType::Continuation) => parse_continuation(header, payload),
            None => Ok(Frame::Unknown(UnknownFrame {
                frame_type: header.frame_type,
                flags: header.flags,
                stream_id: header.stream_id,
                payload,
            })),
        }
    }
}

/// Read the 9-octet header from the front of the buffer without consuming.
fn read_header(buf: &[u8]) -> FrameHeader {
    debug_assert!(buf.len() >= FRAME_HEADER_SIZE);

    let length = u32::from(buf[0]) << 16 | u32::from(buf[1]) << 8 | u32::from(buf[2]);
    let frame_type = buf[3];
    let flags = buf[4];
    // The reserved high bit is masked by StreamId::new.
    let stream_id = StreamId::new(u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]));

    FrameHeader {
        length,
        frame_type,
        flags,
        stream_id,
    }
}

fn require_stream(header: &FrameHeader) -> Result<(), FrameError> {
    if header.stream_id.is_connection() {
        return Err(FrameError::StreamIdRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn require_connection(header: &FrameHeader) -> Result<(), FrameError> {
    if !header.stream_id.is_connection() {
        return Err(FrameError::StreamZeroRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

/// Strip the pad length octet and trailing padding.
///
/// A pad length that consumes the remaining payload (or more) is a
/// PROTOCOL_ERROR (Section 6.1).
fn strip_padding(header: &FrameHeader, mut payload: Bytes) -> Result<Bytes, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: 0,
        });
    }

    let pad_length = payload.get_u8() as usize;
    if pad_length >= payload.len() {
        return Err(FrameError::BadPadding {
            pad_length: pad_length as u8,
            length: payload.len(),
        });
    }

    Ok(payload.slice(..payload.len() - pad_length))
}

fn parse_data(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    // Padding counts toward flow control, so the flow-controlled length
    // is the wire payload length, not the delivered content length.
    let flow_len = header.length;
    let data = if header.has_flag(flags::PADDED) {
        strip_padding(&header, payload)?
    } else {
        payload
    };

    Ok(Frame::Data(DataFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        data,
        flow_len,
    }))
}

fn parse_headers(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    let mut rest = if header.has_flag(flags::PADDED) {
        strip_padding(&header, payload)?
    } else {
        payload
    };

    let priority = if header.has_flag(flags::PRIORITY) {
        if rest.len() < 5 {
            return Err(FrameError::BadLength {
                frame_type: header.frame_type,
                length: rest.len(),
            });
        }
        let word = rest.get_u32();
        Some(Priority {
            exclusive: word & 0x8000_0000 != 0,
            dependency: StreamId::new(word),
            weight: rest.get_u8(),
        })
    } else {
        None
    };

    Ok(Frame::Headers(HeadersFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        end_headers: header.has_flag(flags::END_HEADERS),
        priority,
        fragment: rest,
    }))
}

fn parse_priority(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    if payload.len() != 5 {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    let word = payload.get_u32();
    Ok(Frame::Priority(PriorityFrame {
        stream_id: header.stream_id,
        priority: Priority {
            exclusive: word & 0x8000_0000 != 0,
            dependency: StreamId::new(word),
            weight: payload.get_u8(),
        },
    }))
}

fn parse_rst_stream(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    if payload.len() != 4 {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    Ok(Frame::RstStream(RstStreamFrame {
        stream_id: header.stream_id,
        error_code: payload.get_u32(),
    }))
}

fn parse_settings(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;

    let ack = header.has_flag(flags::ACK);
    if ack && !payload.is_empty() {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }
    if !payload.len().is_multiple_of(6) {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = SettingId::from_u16(payload.get_u16());
        let value = payload.get_u32();
        validate_setting(id, value)?;
        settings.push(Setting { id, value });
    }

    Ok(Frame::Settings(SettingsFrame { ack, settings }))
}

/// Range checks from Section 6.5.2. Unknown settings pass through.
fn validate_setting(id: SettingId, value: u32) -> Result<(), FrameError> {
    let valid = match id {
        SettingId::EnablePush => value <= 1,
        SettingId::InitialWindowSize => value <= 0x7FFF_FFFF,
        SettingId::MaxFrameSize => (16_384..=16_777_215).contains(&value),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(FrameError::BadSettingValue {
            id: id.to_u16(),
            value,
        })
    }
}

fn parse_push_promise(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    let mut rest = if header.has_flag(flags::PADDED) {
        strip_padding(&header, payload)?
    } else {
        payload
    };

    if rest.len() < 4 {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: rest.len(),
        });
    }

    let promised_stream_id = StreamId::new(rest.get_u32());
    Ok(Frame::PushPromise(PushPromiseFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        promised_stream_id,
        fragment: rest,
    }))
}

fn parse_ping(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;

    if payload.len() != 8 {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    let mut data = [0u8; 8];
    data.copy_from_slice(&payload);
    Ok(Frame::Ping(PingFrame {
        ack: header.has_flag(flags::ACK),
        data,
    }))
}

fn parse_goaway(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;

    if payload.len() < 8 {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    let last_stream_id = StreamId::new(payload.get_u32());
    let error_code = payload.get_u32();
    Ok(Frame::GoAway(GoAwayFrame {
        last_stream_id,
        error_code,
        debug_data: payload,
    }))
}

fn parse_window_update(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::BadLength {
            frame_type: header.frame_type,
            length: payload.len(),
        });
    }

    let increment = payload.get_u32() & 0x7FFF_FFFF;
    if increment == 0 {
        return Err(FrameError::ZeroWindowIncrement);
    }

    Ok(Frame::WindowUpdate(WindowUpdateFrame {
        stream_id: header.stream_id,
        increment,
    }))
}

fn parse_continuation(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    Ok(Frame::Continuation(ContinuationFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        fragment: payload,
    }))
}
