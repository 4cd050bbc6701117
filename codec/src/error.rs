use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),

    #[error("cbor encode: {0}")]
    Encode(String),

    #[error("unsupported envelope version {0}")]
    Version(u8),

    #[error("unknown block tag {0}")]
    Tag(u8),

    #[error("{0} trailing bytes after block")]
    Trailing(usize),

    #[error("timestamp out of range")]
    Timestamp,
}
