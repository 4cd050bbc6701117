//! Interfaces between the proposer VM and the chain it wraps
use crate::{
    error::ChainResult,
    id::{BlockId, ChainId, NodeId, SubnetId},
    types::{BlockStatus, EngineMessage, EngineState},
    validators::ValidatorState,
};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::SystemTime,
};
use tokio::sync::mpsc;

/// Shared handle to an inner block
pub type InnerBlockRef = Arc<dyn InnerBlock>;

/// A block as the inner chain sees it.
///
/// Decision methods must be idempotent. `accept` is durable once it returns.
pub trait InnerBlock: Send + Sync + fmt::Debug {
    fn id(&self) -> BlockId;
    fn parent(&self) -> BlockId;
    fn height(&self) -> u64;
    fn timestamp(&self) -> SystemTime;
    fn bytes(&self) -> Vec<u8>;
    fn status(&self) -> BlockStatus;

    fn verify(&self) -> ChainResult<()>;
    fn accept(&self) -> ChainResult<()>;
    fn reject(&self) -> ChainResult<()>;

    /// The two children of an oracle block, or `None` for ordinary blocks
    fn options(&self) -> ChainResult<Option<[InnerBlockRef; 2]>> {
        Ok(None)
    }
}

/// Produces signatures over block header digests on behalf of this node
pub trait BlockSigner: Send + Sync {
    fn sign(&self, digest: &BlockId) -> ChainResult<Vec<u8>>;
}

/// Identity and shared facilities handed to a chain at start-up
#[derive(Clone)]
pub struct ChainContext {
    pub node_id: NodeId,
    pub chain_id: ChainId,
    pub subnet_id: SubnetId,

    /// Engine-wide lock, held by the engine around every VM call.
    /// Background tasks take it before touching shared chain state.
    pub lock: Arc<Mutex<()>>,

    pub validator_state: Arc<dyn ValidatorState>,
    pub signer: Arc<dyn BlockSigner>,
}

impl fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainContext")
            .field("node_id", &self.node_id)
            .field("chain_id", &self.chain_id)
            .field("subnet_id", &self.subnet_id)
            .finish_non_exhaustive()
    }
}

/// A blockchain state machine driven by the consensus engine
pub trait ChainVm: Send + Sync {
    /// Prepare the chain. `to_engine` carries readiness notifications.
    fn initialize(
        &self,
        ctx: &ChainContext,
        to_engine: mpsc::Sender<EngineMessage>,
    ) -> ChainResult<()>;

    /// Build a child of the current preference
    fn build_block(&self) -> ChainResult<InnerBlockRef>;
    fn parse_block(&self, bytes: &[u8]) -> ChainResult<InnerBlockRef>;

    /// `ChainError::NotFound` when the block is unknown
    fn get_block(&self, id: &BlockId) -> ChainResult<InnerBlockRef>;

    fn set_preference(&self, id: BlockId) -> ChainResult<()>;
    fn last_accepted(&self) -> ChainResult<BlockId>;
    fn set_state(&self, state: EngineState) -> ChainResult<()>;
    fn shutdown(&self) -> ChainResult<()>;

    /// Height index capability, if the chain maintains one
    fn height_index(&self) -> Option<&dyn HeightIndexedChainVm> {
        None
    }
}

/// Optional capability: lookup of accepted blocks by height
pub trait HeightIndexedChainVm: Send + Sync {
    /// `Ok` once the index is complete, `ChainError::IndexIncomplete` while
    /// it is still being built
    fn verify_height_index(&self) -> ChainResult<()>;
    fn get_block_id_at_height(&self, height: u64) -> ChainResult<BlockId>;
}
