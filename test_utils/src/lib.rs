//! Test doubles for driving the proposer VM without a real chain.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use slotgate_common::{
    BlockId, BlockSigner, BlockStatus, ChainContext, ChainError, ChainId, ChainResult, ChainVm,
    EngineMessage, EngineState, HeightIndexedChainVm, InnerBlock, InnerBlockRef, NodeId,
    SubnetId, ValidatorSet, ValidatorState,
};
use tokio::sync::mpsc;

/// Whole seconds, since block timestamps carry no sub-second part
pub const GENESIS_TIMESTAMP: u64 = 1_600_000_000;

pub fn genesis_id() -> BlockId {
    BlockId::from_u64(u64::MAX)
}

/// In-memory inner block with observable verification and decisions
pub struct TestBlock {
    id: BlockId,
    parent: BlockId,
    height: u64,
    timestamp: SystemTime,
    bytes: Vec<u8>,
    status: Mutex<BlockStatus>,
    verify_calls: AtomicUsize,
    verify_error: Mutex<Option<String>>,
    options: Mutex<Option<[Arc<TestBlock>; 2]>>,
}

impl fmt::Debug for TestBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestBlock")
            .field("id", &self.id)
            .field("height", &self.height)
            .field("status", &self.status())
            .finish()
    }
}

impl TestBlock {
    pub fn new(
        n: u64,
        parent: BlockId,
        height: u64,
        timestamp: SystemTime,
        status: BlockStatus,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: BlockId::from_u64(n),
            parent,
            height,
            timestamp,
            bytes: format!("inner-{n}").into_bytes(),
            status: Mutex::new(status),
            verify_calls: AtomicUsize::new(0),
            verify_error: Mutex::new(None),
            options: Mutex::new(None),
        })
    }

    /// Accepted block at height 0
    pub fn genesis() -> Arc<Self> {
        Arc::new(Self {
            id: genesis_id(),
            parent: BlockId::EMPTY,
            height: 0,
            timestamp: UNIX_EPOCH + Duration::from_secs(GENESIS_TIMESTAMP),
            bytes: b"inner-genesis".to_vec(),
            status: Mutex::new(BlockStatus::Accepted),
            verify_calls: AtomicUsize::new(0),
            verify_error: Mutex::new(None),
            options: Mutex::new(None),
        })
    }

    /// Processing child one second after `parent`
    pub fn child_of(n: u64, parent: &Arc<TestBlock>) -> Arc<Self> {
        Self::new(
            n,
            parent.id,
            parent.height + 1,
            parent.timestamp + Duration::from_secs(1),
            BlockStatus::Processing,
        )
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Make every later `verify` fail with `reason`
    pub fn fail_verify(&self, reason: &str) {
        *self.verify_error.lock().unwrap() = Some(reason.to_string());
    }

    /// Turn this block into an oracle with the given options
    pub fn set_options(&self, options: [Arc<TestBlock>; 2]) {
        *self.options.lock().unwrap() = Some(options);
    }

    /// Force a status, e.g. to simulate an acceptance lost in a crash
    pub fn set_status(&self, status: BlockStatus) {
        *self.status.lock().unwrap() = status;
    }
}

impl InnerBlock for TestBlock {
    fn id(&self) -> BlockId {
        self.id
    }

    fn parent(&self) -> BlockId {
        self.parent
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    fn status(&self) -> BlockStatus {
        *self.status.lock().unwrap()
    }

    fn verify(&self) -> ChainResult<()> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        match self.verify_error.lock().unwrap().as_ref() {
            Some(reason) => Err(ChainError::Verification(reason.clone())),
            None => Ok(()),
        }
    }

    fn accept(&self) -> ChainResult<()> {
        self.set_status(BlockStatus::Accepted);
        Ok(())
    }

    fn reject(&self) -> ChainResult<()> {
        self.set_status(BlockStatus::Rejected);
        Ok(())
    }

    fn options(&self) -> ChainResult<Option<[InnerBlockRef; 2]>> {
        Ok(self
            .options
            .lock()
            .unwrap()
            .as_ref()
            .map(|[a, b]| [a.clone() as InnerBlockRef, b.clone() as InnerBlockRef]))
    }
}

/// Inner chain over a registry of [`TestBlock`]s
pub struct TestChainVm {
    blocks: Mutex<HashMap<BlockId, Arc<TestBlock>>>,
    genesis: Arc<TestBlock>,
    preferred: Mutex<BlockId>,
    next_id: AtomicU64,
    state: Mutex<Option<EngineState>>,
    to_engine: Mutex<Option<mpsc::Sender<EngineMessage>>>,
    shut_down: AtomicBool,

    height_indexed: AtomicBool,
    incomplete_polls: AtomicUsize,
    index_polls: AtomicUsize,
}

impl TestChainVm {
    pub fn new() -> Arc<Self> {
        let genesis = TestBlock::genesis();
        let blocks = HashMap::from([(genesis.id, genesis.clone())]);
        Arc::new(Self {
            blocks: Mutex::new(blocks),
            preferred: Mutex::new(genesis.id),
            genesis,
            next_id: AtomicU64::new(1),
            state: Mutex::new(None),
            to_engine: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            height_indexed: AtomicBool::new(false),
            incomplete_polls: AtomicUsize::new(0),
            index_polls: AtomicUsize::new(0),
        })
    }

    /// Same chain with a height index that reports incomplete for the first
    /// `incomplete_polls` checks
    pub fn with_height_index(incomplete_polls: usize) -> Arc<Self> {
        let vm = Self::new();
        vm.height_indexed.store(true, Ordering::SeqCst);
        vm.incomplete_polls.store(incomplete_polls, Ordering::SeqCst);
        vm
    }

    /// Report the height index incomplete for the next `polls` checks
    pub fn set_incomplete_polls(&self, polls: usize) {
        self.incomplete_polls.store(polls, Ordering::SeqCst);
    }

    pub fn genesis(&self) -> Arc<TestBlock> {
        self.genesis.clone()
    }

    /// Register a block built outside `build_block`
    pub fn insert(&self, blk: Arc<TestBlock>) {
        self.blocks.lock().unwrap().insert(blk.id, blk);
    }

    pub fn block(&self, id: &BlockId) -> Option<Arc<TestBlock>> {
        self.blocks.lock().unwrap().get(id).cloned()
    }

    /// Fresh child of `parent`, registered and numbered like built blocks
    pub fn child_of(&self, parent: &Arc<TestBlock>) -> Arc<TestBlock> {
        let blk = TestBlock::child_of(self.next_id.fetch_add(1, Ordering::SeqCst), parent);
        self.insert(blk.clone());
        blk
    }

    pub fn preferred(&self) -> BlockId {
        *self.preferred.lock().unwrap()
    }

    pub fn engine_state(&self) -> Option<EngineState> {
        *self.state.lock().unwrap()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn index_polls(&self) -> usize {
        self.index_polls.load(Ordering::SeqCst)
    }

    /// Sender handed over at initialisation
    pub fn to_engine(&self) -> Option<mpsc::Sender<EngineMessage>> {
        self.to_engine.lock().unwrap().clone()
    }
}

impl ChainVm for TestChainVm {
    fn initialize(
        &self,
        _ctx: &ChainContext,
        to_engine: mpsc::Sender<EngineMessage>,
    ) -> ChainResult<()> {
        *self.to_engine.lock().unwrap() = Some(to_engine);
        Ok(())
    }

    fn build_block(&self) -> ChainResult<InnerBlockRef> {
        let parent = self.block(&self.preferred()).ok_or(ChainError::NotFound)?;
        Ok(self.child_of(&parent))
    }

    fn parse_block(&self, bytes: &[u8]) -> ChainResult<InnerBlockRef> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .find(|blk| blk.bytes == bytes)
            .map(|blk| blk.clone() as InnerBlockRef)
            .ok_or_else(|| ChainError::Decode("unknown inner block".to_string()))
    }

    fn get_block(&self, id: &BlockId) -> ChainResult<InnerBlockRef> {
        self.block(id)
            .map(|blk| blk as InnerBlockRef)
            .ok_or(ChainError::NotFound)
    }

    fn set_preference(&self, id: BlockId) -> ChainResult<()> {
        *self.preferred.lock().unwrap() = id;
        Ok(())
    }

    /// Highest accepted block
    fn last_accepted(&self) -> ChainResult<BlockId> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .values()
            .filter(|blk| blk.status() == BlockStatus::Accepted)
            .max_by_key(|blk| blk.height)
            .map(|blk| blk.id)
            .unwrap_or(self.genesis.id))
    }

    fn set_state(&self, state: EngineState) -> ChainResult<()> {
        *self.state.lock().unwrap() = Some(state);
        Ok(())
    }

    fn shutdown(&self) -> ChainResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn height_index(&self) -> Option<&dyn HeightIndexedChainVm> {
        if self.height_indexed.load(Ordering::SeqCst) {
            Some(self)
        } else {
            None
        }
    }
}

impl HeightIndexedChainVm for TestChainVm {
    fn verify_height_index(&self) -> ChainResult<()> {
        self.index_polls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.incomplete_polls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.incomplete_polls.store(remaining - 1, Ordering::SeqCst);
            return Err(ChainError::IndexIncomplete);
        }
        Ok(())
    }

    fn get_block_id_at_height(&self, height: u64) -> ChainResult<BlockId> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .find(|blk| blk.height == height && blk.status() == BlockStatus::Accepted)
            .map(|blk| blk.id)
            .ok_or(ChainError::NotFound)
    }
}

/// Fixed validator set, known up to a movable current height
pub struct TestValidatorState {
    current_height: AtomicU64,
    validators: ValidatorSet,
}

impl TestValidatorState {
    pub fn new(current_height: u64, validators: impl IntoIterator<Item = (NodeId, u64)>) -> Self {
        Self {
            current_height: AtomicU64::new(current_height),
            validators: validators.into_iter().collect(),
        }
    }

    pub fn set_current_height(&self, height: u64) {
        self.current_height.store(height, Ordering::SeqCst);
    }
}

impl ValidatorState for TestValidatorState {
    fn get_current_height(&self) -> ChainResult<u64> {
        Ok(self.current_height.load(Ordering::SeqCst))
    }

    fn get_validator_set(&self, height: u64, _subnet_id: &SubnetId) -> ChainResult<ValidatorSet> {
        let current = self.current_height.load(Ordering::SeqCst);
        if height > current {
            return Err(ChainError::Other(anyhow!(
                "validator set at height {height} unknown, current {current}"
            )));
        }
        Ok(self.validators.clone())
    }
}

/// Signs by echoing the digest
pub struct TestSigner;

impl BlockSigner for TestSigner {
    fn sign(&self, digest: &BlockId) -> ChainResult<Vec<u8>> {
        Ok(digest.to_vec())
    }
}

pub fn test_chain_id() -> ChainId {
    ChainId::from_u64(1)
}

/// Context for `node_id` with the given validator view
pub fn test_context(node_id: NodeId, validator_state: Arc<TestValidatorState>) -> ChainContext {
    ChainContext {
        node_id,
        chain_id: test_chain_id(),
        subnet_id: SubnetId::EMPTY,
        lock: Arc::new(Mutex::new(())),
        validator_state,
        signer: Arc::new(TestSigner),
    }
}
