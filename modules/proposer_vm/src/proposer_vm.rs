//! Slotgate proposer VM module.
//!
//! Wraps an inner chain VM so that, from the activation time on, every block
//! carries proposer metadata: a timestamp, a referenced validator-set height
//! and (inside the proposer windows) the proposer's signature. Before
//! activation blocks pass through untouched.
//!
//! Every method taking `&mut self` must be called with the engine lock
//! ([`ChainContext::lock`]) held; the VM adds no locking of its own around
//! the verification ledger or the tree.

mod batched;
pub mod block;
pub mod clock;
pub mod configuration;
pub mod database;
pub mod error;
mod height_index;
pub mod indexer;
mod post_fork_block;
mod post_fork_common;
mod post_fork_option;
mod pre_fork_block;
mod repair;
pub mod scheduler;
pub mod state;
pub mod tree;
pub mod windower;

use std::{
    collections::HashMap,
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, SystemTime},
};

use slotgate_codec::StatelessBlock;
use slotgate_common::{
    BlockId, BlockStatus, ChainContext, ChainError, ChainVm, EngineMessage, EngineState,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    block::{Block, PostForkBlock, PreForkBlock},
    clock::Clock,
    configuration::ProposerVmConfig,
    database::{Database, PrefixDb, VersionDb},
    error::{VmError, VmResult},
    height_index::VmBlockServer,
    indexer::HeightIndexer,
    scheduler::Scheduler,
    state::State,
    tree::Tree,
    windower::{ProposerWindower, Windower},
};

/// Prefix scoping this layer's keys inside the host database
pub const DB_PREFIX: &[u8] = b"proposervm";

/// Shortest wait after the preferred block before building on it
pub const MIN_BLOCK_DELAY: Duration = Duration::from_secs(1);

/// How far behind the validator-state tip new blocks reference
pub const OPTIMAL_HEIGHT_DELAY: u64 = 256;

/// Largest tolerated lead of a block timestamp over the local clock
pub const MAX_SKEW: Duration = Duration::from_secs(10);

pub struct ProposerVm {
    inner: Arc<dyn ChainVm>,
    ctx: ChainContext,
    activation_time: SystemTime,
    minimum_p_chain_height: u64,
    check_indexed_frequency: Duration,

    db: Arc<VersionDb>,
    state: State,
    windower: Arc<dyn Windower>,
    tree: Tree,
    scheduler: Scheduler,
    to_scheduler: mpsc::Sender<EngineMessage>,
    indexer: Arc<HeightIndexer>,
    clock: Clock,

    /// Verified post-fork blocks awaiting a decision
    verified_blocks: HashMap<BlockId, Arc<PostForkBlock>>,
    preferred: Option<BlockId>,

    /// Written only by `set_state`
    bootstrapped: bool,

    /// Set from configuration, cleared by the index supervisor once the
    /// reset has been committed
    reset_height_index_ongoing: Arc<AtomicBool>,

    /// Timestamp of the last accepted option block's signed parent
    last_accepted_time: Option<SystemTime>,

    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

/// `max(current - OPTIMAL_HEIGHT_DELAY, minimum)`, saturating below zero
pub fn optimal_height(current: u64, minimum: u64) -> u64 {
    current.saturating_sub(OPTIMAL_HEIGHT_DELAY).max(minimum)
}

impl ProposerVm {
    /// Open the metadata store inside `db`, initialise the inner chain,
    /// repair the accepted chain and start the background tasks.
    pub async fn initialize(
        inner: Arc<dyn ChainVm>,
        config: &ProposerVmConfig,
        ctx: ChainContext,
        db: Arc<dyn Database>,
        to_engine: mpsc::Sender<EngineMessage>,
    ) -> VmResult<Self> {
        let scoped: Arc<dyn Database> = Arc::new(PrefixDb::new(DB_PREFIX, db));
        let vm_db = Arc::new(VersionDb::new(scoped));
        let state = State::new(vm_db.clone());

        let windower = Arc::new(ProposerWindower::new(
            ctx.validator_state.clone(),
            ctx.subnet_id,
            ctx.chain_id,
        ));

        let server = Arc::new(VmBlockServer::new(
            inner.clone(),
            state.clone(),
            vm_db.clone(),
            ctx.lock.clone(),
        ));
        let indexer_db = Arc::new(VersionDb::new(vm_db.clone()));
        let indexer = Arc::new(HeightIndexer::new(server, indexer_db));

        let (scheduler, dispatcher, to_scheduler) = Scheduler::new(to_engine, SystemTime::now());
        tokio::spawn(dispatcher.dispatch());

        inner.initialize(&ctx, to_scheduler.clone())?;

        let mut vm = Self {
            inner,
            ctx,
            activation_time: config.activation_time(),
            minimum_p_chain_height: config.minimum_p_chain_height,
            check_indexed_frequency: config.check_indexed_frequency(),
            db: vm_db,
            state,
            windower,
            tree: Tree::new(),
            scheduler,
            to_scheduler,
            indexer,
            clock: Clock::default(),
            verified_blocks: HashMap::new(),
            preferred: None,
            bootstrapped: false,
            reset_height_index_ongoing: Arc::new(AtomicBool::new(config.reset_height_index)),
            last_accepted_time: None,
            cancel: CancellationToken::new(),
            supervisor: None,
        };

        vm.repair_accepted_chain()?;
        vm.set_last_accepted_option_time()?;
        vm.launch_height_index_supervisor();

        info!(
            chain = %vm.ctx.chain_id,
            node = %vm.ctx.node_id,
            "proposer VM initialised"
        );
        Ok(vm)
    }

    /// Parse as a post-fork block first, then as an inner block. A known
    /// post-fork block is returned as the existing instance.
    pub fn parse_block(&self, bytes: &[u8]) -> VmResult<Block> {
        if let Ok(stateless) = slotgate_codec::parse(bytes) {
            match self.parse_post_fork_block(stateless) {
                Ok(blk) => return Ok(Block::PostFork(blk)),
                Err(e) => debug!("not a post-fork block: {e}"),
            }
        }
        let inner = self.inner.parse_block(bytes)?;
        Ok(Block::PreFork(PreForkBlock::new(inner)))
    }

    fn parse_post_fork_block(&self, stateless: StatelessBlock) -> VmResult<Arc<PostForkBlock>> {
        if let Some(existing) = self.get_post_fork_block(&stateless.id())? {
            return Ok(existing);
        }
        let inner = self.inner.parse_block(stateless.inner_bytes())?;
        Ok(PostForkBlock::new(stateless, inner, BlockStatus::Processing))
    }

    /// Look up a block, falling back from this layer to the inner chain
    pub fn get_block(&self, id: &BlockId) -> VmResult<Block> {
        if let Some(blk) = self.get_post_fork_block(id)? {
            return Ok(Block::PostFork(blk));
        }
        let inner = self.inner.get_block(id)?;
        Ok(Block::PreFork(PreForkBlock::new(inner)))
    }

    /// The verified instance, else the persisted record with its inner
    /// block re-parsed
    pub(crate) fn get_post_fork_block(
        &self,
        id: &BlockId,
    ) -> VmResult<Option<Arc<PostForkBlock>>> {
        if let Some(blk) = self.verified_blocks.get(id) {
            return Ok(Some(blk.clone()));
        }
        let Some((stateless, status)) = self.state.get_block(id)? else {
            return Ok(None);
        };
        let inner = self.inner.parse_block(stateless.inner_bytes())?;
        Ok(Some(PostForkBlock::new(stateless, inner, status)))
    }

    pub(crate) fn get_required_post_fork_block(
        &self,
        id: &BlockId,
    ) -> VmResult<Arc<PostForkBlock>> {
        self.get_post_fork_block(id)?.ok_or(VmError::Chain(ChainError::NotFound))
    }

    /// Prefer `id` and schedule the next build for this node's slot
    pub fn set_preference(&mut self, id: BlockId) -> VmResult<()> {
        if self.preferred == Some(id) {
            return Ok(());
        }
        self.preferred = Some(id);

        let blk = match self.get_post_fork_block(&id) {
            Ok(Some(blk)) => blk,
            _ => return Ok(self.inner.set_preference(id)?),
        };
        self.inner.set_preference(blk.inner().id())?;

        let p_chain_height = self.post_fork_p_chain_height(&blk)?;
        let delay = match self.windower.delay(blk.height() + 1, p_chain_height, &self.ctx.node_id) {
            Ok(delay) => delay,
            Err(e) => {
                // Bootstrapping can run past the validator sets known to us
                debug!(block = %id, "failed to fetch the expected delay: {e}");
                return Ok(());
            }
        };

        let next_start = self.post_fork_timestamp(&blk)? + delay.max(MIN_BLOCK_DELAY);
        self.scheduler.set_build_block_time(next_start);
        debug!(block = %id, ?delay, "set preference");
        Ok(())
    }

    /// Build a child of the preferred block
    pub fn build_block(&mut self) -> VmResult<Block> {
        let preferred = self.preferred.ok_or(VmError::Chain(ChainError::NotFound))?;
        let parent = self.get_block(&preferred)?;
        self.build_child(&parent)
    }

    pub fn last_accepted(&self) -> VmResult<BlockId> {
        match self.state.get_last_accepted()? {
            Some(id) => Ok(id),
            None => Ok(self.inner.last_accepted()?),
        }
    }

    pub fn set_state(&mut self, state: EngineState) -> VmResult<()> {
        self.bootstrapped = state == EngineState::NormalOp;
        Ok(self.inner.set_state(state)?)
    }

    /// Stop background work, commit metadata, then shut down the inner chain
    pub fn shutdown(&mut self) -> VmResult<()> {
        self.cancel.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        self.scheduler.close();
        self.db.commit()?;
        info!("proposer VM shut down");
        Ok(self.inner.shutdown()?)
    }

    /// Validator-set height new blocks should reference
    pub fn optimal_p_chain_height(&self, minimum: u64) -> VmResult<u64> {
        let current = self.ctx.validator_state.get_current_height()?;
        Ok(optimal_height(current, minimum))
    }

    /// Tell the engine the inner chain wants to build. Never blocks; the
    /// notification is dropped if the channel is full.
    pub fn notify_inner_block_ready(&self) {
        if let Err(e) = self.to_scheduler.try_send(EngineMessage::PendingTxs) {
            debug!("dropping message to consensus engine: {e}");
        }
    }

    pub fn verify(&mut self, blk: &Block) -> VmResult<()> {
        match blk {
            Block::PreFork(b) => self.verify_pre_fork(b),
            Block::PostFork(b) if b.is_option() => self.verify_option(b),
            Block::PostFork(b) => self.verify_signed(b),
        }
    }

    pub fn accept(&mut self, blk: &Block) -> VmResult<()> {
        match blk {
            Block::PreFork(b) => self.accept_pre_fork(b),
            Block::PostFork(b) => self.accept_post_fork(b),
        }
    }

    pub fn reject(&mut self, blk: &Block) -> VmResult<()> {
        match blk {
            Block::PreFork(b) => self.reject_pre_fork(b),
            Block::PostFork(b) => {
                self.reject_post_fork(b);
                Ok(())
            }
        }
    }

    /// Children of an oracle block
    pub fn options(&self, blk: &Block) -> VmResult<[Block; 2]> {
        match blk {
            Block::PreFork(b) => self.pre_fork_options(b),
            Block::PostFork(b) => self.post_fork_options(b),
        }
    }

    pub fn timestamp(&self, blk: &Block) -> VmResult<SystemTime> {
        match blk {
            Block::PreFork(b) => Ok(b.inner().timestamp()),
            Block::PostFork(b) => self.post_fork_timestamp(b),
        }
    }

    /// Referenced validator-set height; zero before the fork
    pub fn p_chain_height(&self, blk: &Block) -> VmResult<u64> {
        match blk {
            Block::PreFork(_) => Ok(0),
            Block::PostFork(b) => self.post_fork_p_chain_height(b),
        }
    }

    pub(crate) fn post_fork_timestamp(&self, blk: &PostForkBlock) -> VmResult<SystemTime> {
        match blk.stateless() {
            StatelessBlock::Signed(signed) => Ok(signed.timestamp()),
            StatelessBlock::Option(_) => self.option_timestamp(blk),
        }
    }

    pub(crate) fn post_fork_p_chain_height(&self, blk: &PostForkBlock) -> VmResult<u64> {
        match blk.stateless() {
            StatelessBlock::Signed(signed) => Ok(signed.p_chain_height()),
            StatelessBlock::Option(_) => self.option_p_chain_height(blk),
        }
    }

    /// Verify `child` against `parent` as a post-fork block built on it
    fn verify_post_fork_child(
        &mut self,
        parent: &Block,
        child: &Arc<PostForkBlock>,
    ) -> VmResult<()> {
        match parent {
            Block::PreFork(p) => self.pre_fork_verify_post_fork_child(p, child),
            Block::PostFork(p) => self.post_fork_verify_post_fork_child(p, child),
        }
    }

    /// Verify `child` against `parent` as one of its options
    fn verify_post_fork_option(
        &mut self,
        parent: &Block,
        child: &Arc<PostForkBlock>,
    ) -> VmResult<()> {
        match parent {
            Block::PostFork(p) if !p.is_option() => self.signed_verify_post_fork_option(p, child),
            _ => Err(VmError::UnexpectedBlockType),
        }
    }

    fn build_child(&mut self, parent: &Block) -> VmResult<Block> {
        match parent {
            Block::PreFork(p) => self.build_pre_fork_child(p),
            Block::PostFork(p) => self.build_post_fork_child(p),
        }
    }

    /// Verify the embedded inner block unless an equivalent instance was
    /// already verified, then record `blk` in the ledger.
    pub(crate) fn verify_and_record_inner_blk(
        &mut self,
        blk: &Arc<PostForkBlock>,
    ) -> VmResult<()> {
        let inner = blk.inner();
        match self.tree.get(&inner) {
            Some(original) => blk.set_inner(original),
            None => {
                inner.verify()?;
                self.tree.add(inner);
            }
        }
        self.verified_blocks.insert(blk.id(), blk.clone());
        Ok(())
    }

    /// Persist the block record and its height entry in one commit
    pub(crate) fn store_post_fork_block(&mut self, blk: &PostForkBlock) -> VmResult<()> {
        let result = self.write_post_fork_block(blk);
        if result.is_err() {
            self.db.abort();
        }
        result
    }

    fn write_post_fork_block(&mut self, blk: &PostForkBlock) -> VmResult<()> {
        self.state.put_block(blk.stateless(), blk.status())?;
        self.update_height_index(blk.height(), &blk.id())?;
        Ok(self.db.commit()?)
    }

    pub fn preferred(&self) -> Option<BlockId> {
        self.preferred
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimal_height_trails_the_tip() {
        assert_eq!(optimal_height(1000, 500), 744);
        assert_eq!(optimal_height(1000, 0), 744);
    }

    #[test]
    fn optimal_height_never_below_minimum() {
        assert_eq!(optimal_height(100, 500), 500);
        assert_eq!(optimal_height(100, 0), 0);
        assert_eq!(optimal_height(OPTIMAL_HEIGHT_DELAY, 3), 3);
    }
}
