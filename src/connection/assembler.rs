//! Header block assembly: HEADERS plus CONTINUATION into one decoded list.
//!
//! Assembly is atomic from the connection's point of view: from the
//! opening HEADERS until END_HEADERS, the only frame the connection will
//! accept is a CONTINUATION for the same stream, so no other stream's
//! frames are processed mid-block.

use bytes::BytesMut;

use super::ConnectionError;
use crate::frame::{ContinuationFrame, HeadersFrame, Priority, StreamId};
use crate::hpack::{HeaderDecoder, HeaderField};

/// A complete, decoded header block. Never observed partially assembled.
#[derive(Debug, Clone)]
pub struct HeaderBlock {
    /// Priority record from the HEADERS frame, if present.
    pub priority: Option<Priority>,
    /// Decoded fields in wire order.
    pub fields: Vec<HeaderField>,
    /// END_STREAM from the opening HEADERS frame. CONTINUATION frames
    /// carry no such flag.
    pub end_stream: bool,
}

/// In-progress assembly of one header block.
pub(crate) struct HeaderAssembler {
    stream_id: StreamId,
    end_stream: bool,
    priority: Option<Priority>,
    fragments: BytesMut,
    done: bool,
    /// Bound on accumulated compressed bytes. HPACK never compresses a
    /// field below five eighths of its raw size, so a block whose
    /// compressed form exceeds twice the decoded limit cannot fit either
    /// way; failing early avoids buffering unbounded CONTINUATION chains.
    max_fragment_bytes: usize,
}

impl HeaderAssembler {
    /// Start assembling from the opening HEADERS frame.
    pub fn begin(
        frame: &HeadersFrame,
        max_header_list_size: u32,
    ) -> Result<Self, ConnectionError> {
        let mut assembler = Self {
            stream_id: frame.stream_id,
            end_stream: frame.end_stream,
            priority: frame.priority,
            fragments: BytesMut::with_capacity(frame.fragment.len()),
            done: frame.end_headers,
            max_fragment_bytes: 2 * max_header_list_size as usize + 256,
        };
        assembler.append(&frame.fragment)?;
        Ok(assembler)
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Feed the next CONTINUATION frame.
    pub fn push(&mut self, frame: &ContinuationFrame) -> Result<(), ConnectionError> {
        if frame.stream_id != self.stream_id {
            return Err(ConnectionError::protocol(format!(
                "CONTINUATION on stream {} during header block for stream {}",
                frame.stream_id, self.stream_id
            )));
        }
        if frame.fragment.is_empty() {
            return Err(ConnectionError::protocol("empty CONTINUATION frame"));
        }
        self.append(&frame.fragment)?;
        if frame.end_headers {
            self.done = true;
        }
        Ok(())
    }

    /// True once END_HEADERS has been observed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn append(&mut self, fragment: &[u8]) -> Result<(), ConnectionError> {
        if self.fragments.len() + fragment.len() > self.max_fragment_bytes {
            return Err(ConnectionError::protocol("header block too large"));
        }
        self.fragments.extend_from_slice(fragment);
        Ok(())
    }

    /// Decode the accumulated fragments into a complete block.
    ///
    /// Decoded field sizes (name + value + 32 each) are summed against
    /// `max_header_list_size`; overflow is connection-fatal. A block the
    /// decoder cannot finish, including one truncated mid-field, is a
    /// COMPRESSION_ERROR since the compression state is undefined.
    pub fn finish(
        self,
        decoder: &mut dyn HeaderDecoder,
        max_header_list_size: u32,
    ) -> Result<HeaderBlock, ConnectionError> {
        debug_assert!(self.done);

        let fields = decoder
            .decode_block(&self.fragments)
            .map_err(|e| ConnectionError::compression(e.to_string()))?;

        let mut total = 0usize;
        for field in &fields {
            total += field.size();
            if total > max_header_list_size as usize {
                return Err(ConnectionError::protocol("header list exceeds size limit"));
            }
        }

        Ok(HeaderBlock {
            priority: self.priority,
            fields,
            end_stream: self.end_stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::{HeaderEncoder, HpackDecoder, HpackEncoder};
    use bytes::Bytes;

    fn headers_frame(stream: u32, fragment: &[u8], end_headers: bool, end_stream: bool) -> HeadersFrame {
        HeadersFrame {
            stream_id: StreamId::new(stream),
            end_stream,
            end_headers,
            priority: None,
            fragment: Bytes::copy_from_slice(fragment),
        }
    }

    fn continuation(stream: u32, fragment: &[u8], end_headers: bool) -> ContinuationFrame {
        ContinuationFrame {
            stream_id: StreamId::new(stream),
            end_headers,
            fragment: Bytes::copy_from_slice(fragment),
        }
    }

    fn encode(fields: &[HeaderField]) -> Vec<u8> {
        HpackEncoder::new().encode_block(fields)
    }

    #[test]
    fn single_frame_block() {
        let fields = vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new("abc", "def"),
        ];
        let block_bytes = encode(&fields);

        let assembler =
            HeaderAssembler::begin(&headers_frame(1, &block_bytes, true, true), 16_384).unwrap();
        assert!(assembler.is_done());

        let mut decoder = HpackDecoder::new();
        let block = assembler.finish(&mut decoder, 16_384).unwrap();
        assert_eq!(block.fields, fields);
        assert!(block.end_stream);
        assert!(block.priority.is_none());
    }

    #[test]
    fn continuation_chain_reassembles() {
        let fields = vec![
            HeaderField::new(":method", "POST"),
            HeaderField::new("content-type", "application/octet-stream"),
            HeaderField::new("x-large", "v".repeat(64)),
        ];
        let block_bytes = encode(&fields);
        let (a, rest) = block_bytes.split_at(block_bytes.len() / 3);
        let (b, c) = rest.split_at(rest.len() / 2);

        let mut assembler =
            HeaderAssembler::begin(&headers_frame(7, a, false, false), 16_384).unwrap();
        assert!(!assembler.is_done());
        assembler.push(&continuation(7, b, false)).unwrap();
        assert!(!assembler.is_done());
        assembler.push(&continuation(7, c, true)).unwrap();
        assert!(assembler.is_done());

        let mut decoder = HpackDecoder::new();
        let block = assembler.finish(&mut decoder, 16_384).unwrap();
        assert_eq!(block.fields, fields);
        assert!(!block.end_stream);
    }

    #[test]
    fn end_of_stream_comes_from_the_first_frame() {
        let block_bytes = encode(&[HeaderField::new(":method", "GET")]);
        let (a, b) = block_bytes.split_at(1);

        let mut assembler =
            HeaderAssembler::begin(&headers_frame(1, a, false, true), 16_384).unwrap();
        assembler.push(&continuation(1, b, true)).unwrap();

        let mut decoder = HpackDecoder::new();
        let block = assembler.finish(&mut decoder, 16_384).unwrap();
        assert!(block.end_stream);
    }

    #[test]
    fn continuation_on_wrong_stream_is_fatal() {
        let mut assembler =
            HeaderAssembler::begin(&headers_frame(1, &[0x82], false, false), 16_384).unwrap();
        let err = assembler.push(&continuation(3, &[0x84], true)).unwrap_err();
        assert_eq!(err.code(), crate::frame::ErrorCode::ProtocolError);
    }

    #[test]
    fn empty_continuation_is_fatal() {
        let mut assembler =
            HeaderAssembler::begin(&headers_frame(1, &[0x82], false, false), 16_384).unwrap();
        let err = assembler.push(&continuation(1, &[], true)).unwrap_err();
        assert_eq!(err.code(), crate::frame::ErrorCode::ProtocolError);
    }

    #[test]
    fn decoded_size_limit_enforced() {
        let fields = vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new("x-filler", "y".repeat(200)),
        ];
        let block_bytes = encode(&fields);

        let assembler =
            HeaderAssembler::begin(&headers_frame(1, &block_bytes, true, false), 128).unwrap();
        let mut decoder = HpackDecoder::new();
        let err = assembler.finish(&mut decoder, 128).unwrap_err();
        assert_eq!(err.code(), crate::frame::ErrorCode::ProtocolError);
    }

    #[test]
    fn compressed_size_bound_cuts_off_runaway_chains() {
        // max_header_list_size 64 bounds accumulation at 2*64+256 = 384.
        let first = headers_frame(1, &[0u8; 100], false, false);
        let mut assembler = HeaderAssembler::begin(&first, 64).unwrap();
        let mut pushed = 0;
        let err = loop {
            match assembler.push(&continuation(1, &[0u8; 100], false)) {
                Ok(()) => pushed += 1,
                Err(e) => break e,
            }
        };
        assert!(pushed < 4);
        assert_eq!(err.code(), crate::frame::ErrorCode::ProtocolError);
    }

    #[test]
    fn truncated_block_is_compression_error() {
        let block_bytes = encode(&[HeaderField::new("a-long-header-name", "a-long-value")]);
        let truncated = &block_bytes[..block_bytes.len() - 2];

        let assembler =
            HeaderAssembler::begin(&headers_frame(1, truncated, true, false), 16_384).unwrap();
        let mut decoder = HpackDecoder::new();
        let err = assembler.finish(&mut decoder, 16_384).unwrap_err();
        assert_eq!(err.code(), crate::frame::ErrorCode::CompressionError);
    }

    #[test]
    fn priority_record_carried_through() {
        let block_bytes = encode(&[HeaderField::new(":method", "GET")]);
        let frame = HeadersFrame {
            stream_id: StreamId::new(9),
            end_stream: false,
            end_headers: true,
            priority: Some(Priority {
                exclusive: true,
                dependency: StreamId::new(3),
                weight: 42,
            }),
            fragment: Bytes::from(block_bytes),
        };

        let assembler = HeaderAssembler::begin(&frame, 16_384).unwrap();
        let mut decoder = HpackDecoder::new();
        let block = assembler.finish(&mut decoder, 16_384).unwrap();
        let priority = block.priority.unwrap();
        assert!(priority.exclusive);
        assert_eq!(priority.dependency.value(), 3);
        assert_eq!(priority.weight, 42);
    }
}
