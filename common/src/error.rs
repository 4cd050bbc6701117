//! Error taxonomy shared across the chain interfaces
use thiserror::Error;

/// Failures of a key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("corrupt record under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Failures surfaced across the chain VM boundary
#[derive(Debug, Error)]
pub enum ChainError {
    /// Requested block or record does not exist
    #[error("not found")]
    NotFound,

    /// Bytes could not be decoded as a block
    #[error("malformed block: {0}")]
    Decode(String),

    /// Block was rejected by a chain's validity rules
    #[error("verification failed: {0}")]
    Verification(String),

    /// Height index has not finished building
    #[error("height index incomplete")]
    IndexIncomplete,

    /// The chain does not maintain a height index
    #[error("height index not supported")]
    HeightIndexNotSupported,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChainError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
