//! Core type definitions shared by the proposer VM and the chains it wraps

/// Decision status of a block
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
#[cbor(index_only)]
pub enum BlockStatus {
    /// Not known to this node
    #[default]
    #[n(0)]
    Unknown,

    /// Verified or parsed, not yet decided
    #[n(1)]
    Processing,

    /// Decided against
    #[n(2)]
    Rejected,

    /// Decided for, final
    #[n(3)]
    Accepted,
}

impl BlockStatus {
    pub fn decided(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

/// Engine state a chain is told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EngineState {
    /// Catching up with already-decided history
    Bootstrapping,

    /// Normal operation: blocks arrive as they are proposed
    NormalOp,
}

/// Messages travelling from a chain towards the consensus engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMessage {
    /// The chain has transactions and is ready to build a block
    PendingTxs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_encodes_as_index() {
        let encoded = minicbor::to_vec(BlockStatus::Accepted).unwrap();
        assert_eq!(encoded, vec![0x03]);
        assert_eq!(
            minicbor::decode::<BlockStatus>(&encoded).unwrap(),
            BlockStatus::Accepted
        );
    }

    #[test]
    fn only_final_states_are_decided() {
        assert!(BlockStatus::Accepted.decided());
        assert!(BlockStatus::Rejected.decided());
        assert!(!BlockStatus::Processing.decided());
        assert!(!BlockStatus::Unknown.decided());
    }
}
