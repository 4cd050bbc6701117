//! Error types for proposer VM operations.

use slotgate_codec::CodecError;
use slotgate_common::{ChainError, StoreError};

/// Block-rule violations, plus failures passed through from the inner
/// chain and the store
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Child timestamp is before its parent's
    #[error("time not monotonic")]
    TimeNotMonotonic,

    /// Child timestamp is too far ahead of the local clock
    #[error("time too far advanced")]
    TimeTooAdvanced,

    /// Referenced validator-set height is below the configured minimum
    #[error("p-chain height {height} below minimum {minimum}")]
    PChainHeightTooLow { height: u64, minimum: u64 },

    #[error("p-chain height not monotonic")]
    PChainHeightNotMonotonic,

    /// Referenced validator-set height has not been reached locally
    #[error("p-chain height {height} not reached, current {current}")]
    PChainHeightNotReached { height: u64, current: u64 },

    #[error("proposer window not started")]
    ProposerWindowNotStarted,

    /// A pre-fork block was built on a parent at or after activation
    #[error("proposers activated")]
    ProposersActivated,

    /// A post-fork block was built on a parent before activation
    #[error("proposers not activated")]
    ProposersNotActivated,

    #[error("inner parent mismatch")]
    InnerParentMismatch,

    #[error("unexpected block type")]
    UnexpectedBlockType,

    #[error("not an oracle block")]
    NotOracle,

    /// A signature was required within the proposer windows
    #[error("missing proposer signature")]
    MissingProposer,

    /// A signature was present where the block must be unsigned
    #[error("unexpected proposer")]
    UnexpectedProposer,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl VmError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Chain(ChainError::NotFound))
    }
}

impl From<StoreError> for VmError {
    fn from(e: StoreError) -> Self {
        Self::Chain(e.into())
    }
}

impl From<CodecError> for VmError {
    fn from(e: CodecError) -> Self {
        Self::Chain(ChainError::Decode(e.to_string()))
    }
}

/// Rule violations surface as verification failures across the chain
/// boundary
impl From<VmError> for ChainError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Chain(inner) => inner,
            rule => ChainError::Verification(rule.to_string()),
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;
