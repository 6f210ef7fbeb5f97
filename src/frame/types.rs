//! Typed HTTP/2 frames (RFC 7540 Section 6).

use bytes::Bytes;

/// HTTP/2 frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    /// Map a wire byte to a known frame type, if any.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::GoAway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }
}

/// Frame flag bits.
pub mod flags {
    /// DATA/HEADERS: last frame the sender will emit on the stream.
    pub const END_STREAM: u8 = 0x1;
    /// HEADERS/CONTINUATION: header block ends with this frame.
    pub const END_HEADERS: u8 = 0x4;
    /// DATA/HEADERS: payload carries a pad length octet and padding.
    pub const PADDED: u8 = 0x8;
    /// HEADERS: payload carries a 5-octet priority block.
    pub const PRIORITY: u8 = 0x20;
    /// SETTINGS/PING: acknowledgment.
    pub const ACK: u8 = 0x1;
}

/// Stream identifier: 31 bits, the high wire bit is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// Stream 0, reserved for connection control frames.
    pub const CONNECTION: StreamId = StreamId(0);

    /// Create a stream ID, masking the reserved bit.
    #[inline]
    pub fn new(id: u32) -> Self {
        StreamId(id & 0x7FFF_FFFF)
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_connection(self) -> bool {
        self.0 == 0
    }

    /// Client-initiated streams carry odd identifiers.
    #[inline]
    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    /// Server-initiated streams carry even, non-zero identifiers.
    #[inline]
    pub fn is_server_initiated(self) -> bool {
        self.0 != 0 && self.0.is_multiple_of(2)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId::new(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The 9-octet frame header, as read off the wire.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Payload length (24 bits).
    pub length: u32,
    /// Raw frame type byte.
    pub frame_type: u8,
    /// Flag bits.
    pub flags: u8,
    /// Stream identifier, reserved bit already masked.
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// The known frame type, if the byte is one we recognize.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A fully parsed frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// Unrecognized frame type; ignored by the connection per Section 4.1.
    Unknown(UnknownFrame),
}

impl Frame {
    /// The stream this frame belongs to (0 for connection-level frames).
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::Settings(_) => StreamId::CONNECTION,
            Frame::PushPromise(f) => f.stream_id,
            Frame::Ping(_) => StreamId::CONNECTION,
            Frame::GoAway(_) => StreamId::CONNECTION,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
            Frame::Unknown(f) => f.stream_id,
        }
    }
}

/// DATA frame (type=0x0).
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub end_stream: bool,
    /// Payload with padding stripped.
    pub data: Bytes,
    /// Wire payload length, including the pad length octet and padding.
    /// Flow control is debited by this amount, not by `data.len()`.
    pub flow_len: u32,
}

impl DataFrame {
    /// Build an outgoing DATA frame. Locally produced frames are never
    /// padded, so the flow-controlled length equals the payload length.
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        let flow_len = data.len() as u32;
        Self {
            stream_id,
            end_stream,
            data,
            flow_len,
        }
    }
}

/// HEADERS frame (type=0x1).
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<Priority>,
    /// HPACK-encoded header block fragment, padding stripped.
    pub fragment: Bytes,
}

/// Priority record carried by HEADERS or PRIORITY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: StreamId,
    /// Weight minus one (wire value 0-255 maps to weight 1-256).
    pub weight: u8,
}

/// PRIORITY frame (type=0x2).
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    pub stream_id: StreamId,
    pub priority: Priority,
}

/// RST_STREAM frame (type=0x3).
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub error_code: u32,
}

/// SETTINGS frame (type=0x4).
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Vec<Setting>,
}

/// One setting entry.
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    pub id: SettingId,
    pub value: u32,
}

/// Setting identifiers (RFC 7540 Section 6.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    /// Unknown identifiers are carried through and ignored.
    Unknown(u16),
}

impl SettingId {
    pub fn from_u16(id: u16) -> Self {
        match id {
            0x1 => SettingId::HeaderTableSize,
            0x2 => SettingId::EnablePush,
            0x3 => SettingId::MaxConcurrentStreams,
            0x4 => SettingId::InitialWindowSize,
            0x5 => SettingId::MaxFrameSize,
            0x6 => SettingId::MaxHeaderListSize,
            other => SettingId::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
            SettingId::Unknown(other) => other,
        }
    }
}

/// PUSH_PROMISE frame (type=0x5). A server never originates these here;
/// the type is recognized so a client sending one can be rejected.
#[derive(Debug, Clone)]
pub struct PushPromiseFrame {
    pub stream_id: StreamId,
    pub end_headers: bool,
    pub promised_stream_id: StreamId,
    pub fragment: Bytes,
}

/// PING frame (type=0x6).
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    pub ack: bool,
    pub data: [u8; 8],
}

/// GOAWAY frame (type=0x7).
#[derive(Debug, Clone)]
pub struct GoAwayFrame {
    pub last_stream_id: StreamId,
    pub error_code: u32,
    pub debug_data: Bytes,
}

/// WINDOW_UPDATE frame (type=0x8).
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub increment: u32,
}

/// CONTINUATION frame (type=0x9).
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    pub stream_id: StreamId,
    pub end_headers: bool,
    pub fragment: Bytes,
}

/// A frame of a type this implementation does not know.
#[derive(Debug, Clone)]
pub struct UnknownFrame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_mapping() {
        for byte in 0x0..=0x9u8 {
            let ty = FrameType::from_u8(byte).unwrap();
            assert_eq!(ty as u8, byte);
        }
        assert_eq!(FrameType::from_u8(0xa), None);
        assert_eq!(FrameType::from_u8(0xff), None);
    }

    #[test]
    fn stream_id_masks_reserved_bit() {
        assert_eq!(StreamId::new(0x8000_0005).value(), 5);
        assert_eq!(StreamId::from(0xFFFF_FFFF).value(), 0x7FFF_FFFF);
    }

    #[test]
    fn stream_id_parity() {
        assert!(StreamId::new(1).is_client_initiated());
        assert!(StreamId::new(41).is_client_initiated());
        assert!(!StreamId::new(2).is_client_initiated());
        assert!(StreamId::new(2).is_server_initiated());
        assert!(!StreamId::new(0).is_server_initiated());
        assert!(StreamId::CONNECTION.is_connection());
        assert!(!StreamId::new(1).is_connection());
    }

    #[test]
    fn stream_id_ordering() {
        assert!(StreamId::new(31) < StreamId::new(33));
        assert_eq!(StreamId::new(7), StreamId::from(7));
    }

    #[test]
    fn frame_header_flags() {
        let header = FrameHeader {
            length: 0,
            frame_type: FrameType::Headers as u8,
            flags: flags::END_HEADERS | flags::PRIORITY,
            stream_id: StreamId::new(1),
        };
        assert!(header.has_flag(flags::END_HEADERS));
        assert!(header.has_flag(flags::PRIORITY));
        assert!(!header.has_flag(flags::END_STREAM));
        assert_eq!(header.frame_type(), Some(FrameType::Headers));
    }

    #[test]
    fn frame_header_unknown_type() {
        let header = FrameHeader {
            length: 0,
            frame_type: 0xee,
            flags: 0,
            stream_id: StreamId::CONNECTION,
        };
        assert_eq!(header.frame_type(), None);
    }

    #[test]
    fn connection_frames_report_stream_zero() {
        let settings = Frame::Settings(SettingsFrame {
            ack: false,
            settings: vec![],
        });
        assert!(settings.stream_id().is_connection());

        let ping = Frame::Ping(PingFrame {
            ack: true,
            data: [0; 8],
        });
        assert!(ping.stream_id().is_connection());

        let goaway = Frame::GoAway(GoAwayFrame {
            last_stream_id: StreamId::new(9),
            error_code: 0,
            debug_data: Bytes::new(),
        });
        assert!(goaway.stream_id().is_connection());
    }

    #[test]
    fn stream_frames_report_their_stream() {
        let data = Frame::Data(DataFrame::new(StreamId::new(3), Bytes::new(), false));
        assert_eq!(data.stream_id().value(), 3);

        let rst = Frame::RstStream(RstStreamFrame {
            stream_id: StreamId::new(5),
            error_code: 0x8,
        });
        assert_eq!(rst.stream_id().value(), 5);
    }

    #[test]
    fn outgoing_data_flow_len_matches_payload() {
        let frame = DataFrame::new(StreamId::new(1), Bytes::from_static(b"hello"), true);
        assert_eq!(frame.flow_len, 5);
        assert!(frame.end_stream);
    }

    #[test]
    fn setting_id_roundtrip() {
        for raw in [0x1u16, 0x2, 0x3, 0x4, 0x5, 0x6, 0x99] {
            assert_eq!(SettingId::from_u16(raw).to_u16(), raw);
        }
        assert_eq!(SettingId::from_u16(0x42), SettingId::Unknown(0x42));
    }
}
