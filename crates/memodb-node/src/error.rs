/// Errors from parsing or constructing a content identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidError {
    /// A varint field ran past the end of the input.
    #[error("truncated varint in CID")]
    TruncatedVarint,

    /// A varint field was longer than 63 useful bits or had a trailing
    /// zero continuation byte.
    #[error("malformed varint in CID: {0}")]
    MalformedVarint(&'static str),

    /// Only CID version 1 is supported.
    #[error("unsupported CID version: {0}")]
    UnsupportedVersion(u64),

    /// The content codec is not raw or dag-cbor.
    #[error("unsupported CID codec: 0x{0:x}")]
    UnsupportedCodec(u64),

    /// The binary form ended before the declared digest length.
    #[error("truncated CID: digest shorter than declared length")]
    TruncatedDigest,

    /// Extra bytes followed a complete binary CID.
    #[error("trailing bytes after CID")]
    TrailingBytes,

    /// The textual form had no recognizable multibase prefix or invalid
    /// characters for its alphabet.
    #[error("invalid multibase text: {0}")]
    InvalidMultibase(String),
}

/// Errors from decoding canonical CBOR. Each variant corresponds to one of
/// the malformed-input classes the decoder must reject without crashing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CborError {
    /// Input ended in the middle of an item.
    #[error("unexpected end of CBOR input")]
    UnexpectedEof,

    /// A complete item was followed by extra bytes (single-item API only).
    #[error("{0} trailing byte(s) after CBOR item")]
    TrailingBytes(usize),

    /// Additional-info values 28, 29 and 30 are reserved.
    #[error("reserved additional-info value {0}")]
    ReservedAdditionalInfo(u8),

    /// Major type 0, 1 or 6 with additional-info 31 (indefinite).
    #[error("indefinite length is not valid for this major type")]
    IndefiniteNotAllowed,

    /// A break (0xff) appeared outside an indefinite-length container.
    #[error("unexpected break code")]
    UnexpectedBreak,

    /// Two-byte simple values (0xf8) and simple values other than
    /// false/true/null/undefined.
    #[error("unsupported simple value")]
    UnsupportedSimple,

    /// A tag other than 42 (content link).
    #[error("unsupported CBOR tag {0}")]
    UnsupportedTag(u64),

    /// Tag 42 content was not a byte string starting with 0x00, or the
    /// CID inside it did not parse.
    #[error("invalid content link: {0}")]
    InvalidLink(#[source] CidError),

    /// Tag 42 content had the wrong shape (not a byte string, or missing
    /// the leading 0x00 multibase-identity prefix).
    #[error("content link is not a 0x00-prefixed byte string")]
    MalformedLink,

    /// Negative integer beyond the signed 64-bit range.
    #[error("integer out of signed 64-bit range")]
    IntegerOutOfRange,

    /// A chunk inside an indefinite string had the wrong major type or was
    /// itself indefinite.
    #[error("invalid chunk inside indefinite-length string")]
    InvalidStringChunk,

    /// Text string bytes were not well-formed UTF-8.
    #[error("text string is not valid UTF-8")]
    InvalidUtf8,

    /// A map key was not a text string.
    #[error("map key is not a text string")]
    MapKeyNotString,

    /// The same key appeared twice in one map.
    #[error("duplicate map key: {0:?}")]
    DuplicateMapKey(String),

    /// An indefinite-length map ended after a key with no value.
    #[error("odd number of items in map")]
    OddMapLength,

    /// A declared length did not fit in the platform's usize.
    #[error("declared length too large")]
    LengthOverflow,

    /// Container nesting exceeded the configured depth limit.
    #[error("nesting depth limit of {0} exceeded")]
    DepthLimit(usize),
}
