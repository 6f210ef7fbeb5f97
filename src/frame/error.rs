//! Frame-level errors and the RFC 7540 error code registry.

use std::fmt;

/// HTTP/2 error codes (RFC 7540 Section 7).
///
/// Carried in RST_STREAM and GOAWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown.
    NoError = 0x0,
    /// Protocol error detected.
    ProtocolError = 0x1,
    /// Implementation fault.
    InternalError = 0x2,
    /// Flow control limits exceeded.
    FlowControlError = 0x3,
    /// Settings not acknowledged in time.
    SettingsTimeout = 0x4,
    /// Frame received for a closed stream.
    StreamClosed = 0x5,
    /// Frame size incorrect.
    FrameSizeError = 0x6,
    /// Stream not processed.
    RefusedStream = 0x7,
    /// Stream cancelled.
    Cancel = 0x8,
    /// Compression state not updated.
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method.
    ConnectError = 0xa,
    /// Processing capacity exceeded.
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS requirements not met.
    InadequateSecurity = 0xc,
    /// HTTP/1.1 required.
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            // Unknown codes must be treated as INTERNAL_ERROR (Section 7).
            _ => ErrorCode::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Errors produced while decoding a frame from the wire.
///
/// All of these are connection-fatal; `error_code()` gives the code the
/// resulting GOAWAY carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame length exceeds the advertised SETTINGS_MAX_FRAME_SIZE.
    TooLarge { length: u32, max: u32 },
    /// Frame type requires stream ID 0 but carried one.
    StreamZeroRequired { frame_type: u8 },
    /// Frame type requires a non-zero stream ID but carried 0.
    StreamIdRequired { frame_type: u8 },
    /// Fixed-length frame carried a payload of the wrong size.
    BadLength { frame_type: u8, length: usize },
    /// Pad length consumes the entire payload or more.
    BadPadding { pad_length: u8, length: usize },
    /// Setting value outside its legal range.
    BadSettingValue { id: u16, value: u32 },
    /// WINDOW_UPDATE with a zero increment.
    ZeroWindowIncrement,
}

impl FrameError {
    /// The RFC 7540 error code this failure maps onto.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::TooLarge { .. } | FrameError::BadLength { .. } => {
                ErrorCode::FrameSizeError
            }
            // SETTINGS_INITIAL_WINDOW_SIZE above 2^31-1 is the one setting
            // violation the RFC assigns FLOW_CONTROL_ERROR (Section 6.5.2).
            FrameError::BadSettingValue { id: 0x4, .. } => ErrorCode::FlowControlError,
            _ => ErrorCode::ProtocolError,
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLarge { length, max } => {
                write!(f, "frame length {} exceeds maximum {}", length, max)
            }
            FrameError::StreamZeroRequired { frame_type } => {
                write!(f, "frame type 0x{:02x} must use stream 0", frame_type)
            }
            FrameError::StreamIdRequired { frame_type } => {
                write!(f, "frame type 0x{:02x} must not use stream 0", frame_type)
            }
            FrameError::BadLength { frame_type, length } => {
                write!(
                    f,
                    "frame type 0x{:02x} has invalid payload length {}",
                    frame_type, length
                )
            }
            FrameError::BadPadding { pad_length, length } => {
                write!(
                    f,
                    "pad length {} exceeds payload length {}",
                    pad_length, length
                )
            }
            FrameError::BadSettingValue { id, value } => {
                write!(f, "setting 0x{:04x} has invalid value {}", id, value)
            }
            FrameError::ZeroWindowIncrement => write!(f, "window increment of zero"),
        }
    }
}

impl std::error::Error for FrameError {}
