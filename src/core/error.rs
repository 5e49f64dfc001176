use thiserror::Error;

/// Errors raised by the APDU and BER-TLV codecs.
///
/// Every variant is reported at the point the malformation is found; nothing
/// here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Malformed response: expected at least 2 bytes, got {len}")]
    MalformedResponse { len: usize },

    #[error("Continuation limit of {limit} rounds exceeded")]
    ContinuationLimitExceeded { limit: u16 },

    #[error("Indefinite length encoding is not supported (at offset {offset})")]
    IndefiniteLengthUnsupported { offset: usize },

    #[error("Tag number at offset {offset} does not fit in 64 bits")]
    TagOverflow { offset: usize },

    #[error("Buffer underrun at offset {offset}: need {needed} bytes, {available} available")]
    BufferUnderrun {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Child at offset {offset} ends at {end}, past its parent's end {parent_end}")]
    BoundaryOverrun {
        offset: usize,
        end: usize,
        parent_end: usize,
    },

    #[error("{count} trailing bytes after the last element at offset {offset}")]
    TrailingBytes { offset: usize, count: usize },

    #[error("Integer of {len} bytes does not fit in 64 bits")]
    IntegerOverflow { len: usize },

    #[error("Invalid IA5 character 0x{byte:02X} at index {index}")]
    InvalidIA5Character { byte: u8, index: usize },

    #[error("Invalid boolean encoding: {0}")]
    InvalidBoolean(String),

    #[error("Invalid NULL encoding: {len} content bytes")]
    InvalidNull { len: usize },

    #[error("Node is {0}, operation requires the other structure kind")]
    WrongStructure(&'static str),

    #[error("Nesting deeper than {max_depth} levels")]
    NestingTooDeep { max_depth: usize },
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;
