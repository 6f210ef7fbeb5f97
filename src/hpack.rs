//! Header fields and the HPACK seam.
//!
//! Header compression state (static/dynamic tables, Huffman coding) is an
//! external collaborator: the engine talks to it through the
//! [`HeaderDecoder`] and [`HeaderEncoder`] traits and ships default
//! adapters backed by the `hpack` crate. Size accounting against
//! SETTINGS_MAX_HEADER_LIST_SIZE stays in the engine (the header
//! assembler), not in the codec.

use std::fmt;

/// A single header field.
///
/// Names are kept as octet strings; HTTP/2 requires them to be
/// ASCII-lowercase on the wire. Order within a block is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Field size for header list accounting:
    /// name length + value length + 32 (RFC 7540 Section 6.5.2).
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }

    /// Pseudo-header fields carry HTTP semantics and sort before regular
    /// fields in a block.
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }
}

/// Failure while decoding a header block fragment.
///
/// The compression state is undefined after any decode failure, so these
/// are always connection-fatal (COMPRESSION_ERROR).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpackError {
    message: String,
}

impl HpackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HpackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "header block decode failed: {}", self.message)
    }
}

impl std::error::Error for HpackError {}

/// Decode side of the HPACK seam.
pub trait HeaderDecoder {
    /// Decode one complete header block into fields, in wire order.
    ///
    /// A block truncated mid-field, or otherwise malformed, is an error;
    /// partial output must not be observable.
    fn decode_block(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError>;

    /// Bound the dynamic table size the peer's encoder may use; mirrors
    /// the SETTINGS_HEADER_TABLE_SIZE we advertise.
    fn set_max_table_size(&mut self, size: usize);
}

/// Encode side of the HPACK seam.
pub trait HeaderEncoder {
    /// Encode a header list into one contiguous block.
    fn encode_block(&mut self, fields: &[HeaderField]) -> Vec<u8>;

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    fn set_max_table_size(&mut self, size: usize);
}

/// Default decoder over `hpack::Decoder`.
pub struct HpackDecoder {
    inner: hpack::Decoder<'static>,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: hpack::Decoder::new(),
        }
    }
}

impl HeaderDecoder for HpackDecoder {
    fn decode_block(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let fields = self
            .inner
            .decode(block)
            .map_err(|e| HpackError::new(format!("{:?}", e)))?;
        Ok(fields
            .into_iter()
            .map(|(name, value)| HeaderField { name, value })
            .collect())
    }

    fn set_max_table_size(&mut self, size: usize) {
        self.inner.set_max_table_size(size);
    }
}

/// Default encoder over `hpack::Encoder`.
pub struct HpackEncoder {
    inner: hpack::Encoder<'static>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: hpack::Encoder::new(),
        }
    }
}

impl HeaderEncoder for HpackEncoder {
    fn encode_block(&mut self, fields: &[HeaderField]) -> Vec<u8> {
        self.inner.encode(
            fields
                .iter()
                .map(|field| (field.name.as_slice(), field.value.as_slice())),
        )
    }

    fn set_max_table_size(&mut self, _size: usize) {
        // The backing encoder emits literal representations only and never
        // grows the peer's dynamic table, so no table size update is
        // required on the wire.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_field_size_accounting() {
        let field = HeaderField::new(":method", "GET");
        assert_eq!(field.size(), 7 + 3 + 32);

        let empty = HeaderField::new("", "");
        assert_eq!(empty.size(), 32);
    }

    #[test]
    fn pseudo_header_detection() {
        assert!(HeaderField::new(":status", "200").is_pseudo());
        assert!(!HeaderField::new("content-type", "text/plain").is_pseudo());
        assert!(!HeaderField::new("", "").is_pseudo());
    }

    #[test]
    fn encode_decode_preserves_fields_and_order() {
        let fields = vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":path", "/"),
            HeaderField::new("abc", "def"),
        ];

        let mut encoder = HpackEncoder::new();
        let block = encoder.encode_block(&fields);
        assert!(!block.is_empty());

        let mut decoder = HpackDecoder::new();
        let decoded = decoder.decode_block(&block).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn decode_across_encoder_state() {
        // Two blocks through the same encoder/decoder pair; field order
        // and values must survive both.
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        let first = vec![HeaderField::new(":status", "200")];
        let second = vec![
            HeaderField::new(":status", "200"),
            HeaderField::new("x-request-id", "42"),
        ];

        let decoded = decoder.decode_block(&encoder.encode_block(&first)).unwrap();
        assert_eq!(decoded, first);
        let decoded = decoder.decode_block(&encoder.encode_block(&second)).unwrap();
        assert_eq!(decoded, second);
    }

    #[test]
    fn truncated_block_fails() {
        let mut encoder = HpackEncoder::new();
        let block = encoder.encode_block(&[HeaderField::new("a-fairly-long-name", "and-value")]);

        let mut decoder = HpackDecoder::new();
        assert!(decoder.decode_block(&block[..block.len() - 3]).is_err());
    }

    #[test]
    fn garbage_block_fails() {
        let mut decoder = HpackDecoder::new();
        // An indexed-field reference to index 127+, cut off mid-integer.
        assert!(decoder.decode_block(&[0xff]).is_err());
    }
}
