//! Rebuilds the height → block index by walking the accepted post-fork
//! chain backwards from a checkpoint.
//!
//! Progress is flushed every [`COMMIT_SIZE_CAP`] blocks with the checkpoint
//! moved to the lowest block not yet indexed, so an interrupted rebuild
//! resumes where it stopped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::anyhow;
use slotgate_common::{BlockId, ChainError, ChainResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{database::VersionDb, state::State};

pub const COMMIT_SIZE_CAP: u64 = 1000;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(15);

/// Throttle: sleep this many times the time spent on each block
const SLEEP_DURATION_MULTIPLIER: u32 = 5;

/// What the indexer needs from the VM it belongs to
pub trait BlockServer: Send + Sync {
    /// Height of a persisted post-fork block, `None` when there is no record
    fn post_fork_block_height(&self, id: &BlockId) -> ChainResult<Option<u64>>;

    /// Commit `overlay` into the VM's database, then the VM's database
    /// itself, as one step with respect to the VM's own writes
    fn commit(&self, overlay: &VersionDb) -> ChainResult<()>;
}

pub struct HeightIndexer {
    server: Arc<dyn BlockServer>,
    state: State,
    db: Arc<VersionDb>,
    repaired: AtomicBool,
    commit_size_cap: u64,
}

impl HeightIndexer {
    /// `db` is the indexer's own overlay on top of the VM's database
    pub fn new(server: Arc<dyn BlockServer>, db: Arc<VersionDb>) -> Self {
        Self {
            server,
            state: State::new(db.clone()),
            db,
            repaired: AtomicBool::new(false),
            commit_size_cap: COMMIT_SIZE_CAP,
        }
    }

    pub fn with_commit_size_cap(mut self, cap: u64) -> Self {
        self.commit_size_cap = cap.max(1);
        self
    }

    pub fn is_repaired(&self) -> bool {
        self.repaired.load(Ordering::Acquire)
    }

    pub fn mark_repaired(&self, repaired: bool) {
        self.repaired.store(repaired, Ordering::Release);
    }

    /// Whether the index is missing entries. Leaves a checkpoint at the last
    /// accepted block when a rebuild has never been started.
    pub fn should_repair(&self) -> ChainResult<bool> {
        if self.state.get_checkpoint()?.is_some() {
            return Ok(true);
        }

        // No checkpoint: either the index is complete or it was never built
        let Some(last_accepted) = self.state.get_last_accepted()? else {
            return Ok(false);
        };
        let height = self
            .server
            .post_fork_block_height(&last_accepted)?
            .ok_or(ChainError::NotFound)?;
        if self.state.get_block_id_at_height(height)?.is_some() {
            return Ok(false);
        }

        // Persist the starting point before any block accepted meanwhile
        // could be indexed on its own
        self.state.set_checkpoint(&last_accepted)?;
        self.flush()?;
        Ok(true)
    }

    /// Rebuild from the checkpoint down to the fork. Blocking; run it off
    /// the async runtime.
    pub fn repair_height_index(&self, cancel: &CancellationToken) -> ChainResult<()> {
        let Some(start) = self.state.get_checkpoint()? else {
            self.mark_repaired(true);
            return Ok(());
        };
        let height = self
            .server
            .post_fork_block_height(&start)?
            .ok_or(ChainError::NotFound)?;

        self.do_repair(cancel, start, height)?;
        self.flush()?;
        self.mark_repaired(true);
        Ok(())
    }

    fn do_repair(
        &self,
        cancel: &CancellationToken,
        start: BlockId,
        start_height: u64,
    ) -> ChainResult<()> {
        let started = Instant::now();
        let mut last_log = started;
        let mut indexed = 0u64;
        let mut last_flushed = 0u64;

        let mut current = start;
        let mut height = start_height;
        loop {
            if cancel.is_cancelled() {
                return Err(ChainError::Other(anyhow!("height index repair cancelled")));
            }
            let processing = Instant::now();

            let Some((block, _)) = self.state.get_block(&current)? else {
                // Walked past the first post-fork block
                return self.finish(height + 1, indexed, started);
            };

            // The checkpoint is always the highest block not yet indexed
            if indexed - last_flushed >= self.commit_size_cap {
                self.state.set_checkpoint(&current)?;
                self.flush()?;
                debug!(checkpoint = %current, height, "height index progress committed");
                last_flushed = indexed;
            }

            self.state.set_block_id_at_height(height, &current)?;
            indexed += 1;

            if last_log.elapsed() > PROGRESS_LOG_INTERVAL {
                info!(indexed, height, "building height index");
                last_log = Instant::now();
            }

            let Some(parent_height) = height.checked_sub(1) else {
                return self.finish(0, indexed, started);
            };
            current = block.parent_id();
            height = parent_height;

            std::thread::sleep(processing.elapsed() * SLEEP_DURATION_MULTIPLIER);
        }
    }

    fn finish(&self, fork_height: u64, indexed: u64, started: Instant) -> ChainResult<()> {
        self.state.set_fork_height(fork_height)?;
        self.state.delete_checkpoint()?;
        info!(
            fork_height,
            indexed,
            duration = ?started.elapsed(),
            "height index rebuilt"
        );
        Ok(())
    }

    /// Wipe every height entry together with the checkpoint and fork height
    pub fn reset_height_index(&self) -> ChainResult<()> {
        self.state.reset_height_index()?;
        self.flush()
    }

    fn flush(&self) -> ChainResult<()> {
        self.server.commit(&self.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, MemDatabase};
    use slotgate_codec::{build_unsigned, StatelessBlock};
    use slotgate_common::BlockStatus;
    use std::{collections::HashMap, sync::Mutex, time::UNIX_EPOCH};

    /// Heights captured as the blocks are written; commits the VM layer
    struct FakeServer {
        heights: Mutex<HashMap<BlockId, u64>>,
        vm_db: Arc<VersionDb>,
    }

    impl BlockServer for FakeServer {
        fn post_fork_block_height(&self, id: &BlockId) -> ChainResult<Option<u64>> {
            Ok(self.heights.lock().unwrap().get(id).copied())
        }

        fn commit(&self, overlay: &VersionDb) -> ChainResult<()> {
            overlay.commit()?;
            Ok(self.vm_db.commit()?)
        }
    }

    struct Fixture {
        base: Arc<MemDatabase>,
        vm_state: State,
        server: Arc<FakeServer>,
        indexer_db: Arc<VersionDb>,
        chain: Vec<BlockId>,
    }

    /// `count` accepted post-fork blocks at heights `fork_height..`
    fn fixture(fork_height: u64, count: u64) -> Fixture {
        let base = Arc::new(MemDatabase::new());
        let vm_db = Arc::new(VersionDb::new(base.clone()));
        let vm_state = State::new(vm_db.clone());
        let server = Arc::new(FakeServer {
            heights: Mutex::new(HashMap::new()),
            vm_db: vm_db.clone(),
        });

        let mut parent = BlockId::from_u64(999);
        let mut chain = Vec::new();
        for i in 0..count {
            let ts = UNIX_EPOCH + Duration::from_secs(1_000 + i);
            let blk = build_unsigned(parent, ts, 0, format!("inner-{i}").as_bytes()).unwrap();
            let id = blk.id();
            vm_state
                .put_block(&StatelessBlock::Signed(blk), BlockStatus::Accepted)
                .unwrap();
            server.heights.lock().unwrap().insert(id, fork_height + i);
            chain.push(id);
            parent = id;
        }
        if let Some(last) = chain.last() {
            vm_state.set_last_accepted(last).unwrap();
        }
        vm_db.commit().unwrap();

        let indexer_db = Arc::new(VersionDb::new(vm_db));
        Fixture {
            base,
            vm_state,
            server,
            indexer_db,
            chain,
        }
    }

    fn indexer(f: &Fixture) -> HeightIndexer {
        HeightIndexer::new(f.server.clone(), f.indexer_db.clone())
    }

    #[test]
    fn empty_chain_needs_no_repair() {
        let f = fixture(1, 0);
        assert!(!indexer(&f).should_repair().unwrap());
    }

    #[test]
    fn missing_entries_leave_a_committed_checkpoint() {
        let f = fixture(5, 3);
        let idx = indexer(&f);
        assert!(idx.should_repair().unwrap());

        // Flushed all the way to the base store
        let persisted = State::new(f.base.clone());
        assert_eq!(persisted.get_checkpoint().unwrap(), f.chain.last().copied());
    }

    #[test]
    fn rebuild_indexes_every_post_fork_block() {
        let f = fixture(5, 4);
        let idx = indexer(&f);
        assert!(idx.should_repair().unwrap());
        idx.repair_height_index(&CancellationToken::new()).unwrap();

        assert!(idx.is_repaired());
        let persisted = State::new(f.base.clone());
        for (i, id) in f.chain.iter().enumerate() {
            assert_eq!(persisted.get_block_id_at_height(5 + i as u64).unwrap(), Some(*id));
        }
        assert_eq!(persisted.get_block_id_at_height(4).unwrap(), None);
        assert_eq!(persisted.get_fork_height().unwrap(), Some(5));
        assert_eq!(persisted.get_checkpoint().unwrap(), None);

        // Complete index: nothing more to do
        assert!(!idx.should_repair().unwrap());
    }

    #[test]
    fn small_commit_cap_gives_the_same_index() {
        let f = fixture(1, 7);
        let idx = indexer(&f).with_commit_size_cap(2);
        assert!(idx.should_repair().unwrap());
        idx.repair_height_index(&CancellationToken::new()).unwrap();

        let persisted = State::new(f.base.clone());
        for (i, id) in f.chain.iter().enumerate() {
            assert_eq!(persisted.get_block_id_at_height(1 + i as u64).unwrap(), Some(*id));
        }
        assert_eq!(persisted.get_fork_height().unwrap(), Some(1));
    }

    #[test]
    fn cancelled_rebuild_keeps_the_checkpoint() {
        let f = fixture(1, 3);
        let idx = indexer(&f);
        assert!(idx.should_repair().unwrap());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(idx.repair_height_index(&cancel).is_err());
        assert!(!idx.is_repaired());
        assert!(f.vm_state.get_checkpoint().unwrap().is_some());
        assert!(idx.should_repair().unwrap());
    }

    #[test]
    fn no_checkpoint_marks_repaired() {
        let f = fixture(1, 0);
        let idx = indexer(&f);
        idx.repair_height_index(&CancellationToken::new()).unwrap();
        assert!(idx.is_repaired());
    }

    #[test]
    fn reset_clears_entries_and_markers() {
        let f = fixture(2, 3);
        let idx = indexer(&f);
        assert!(idx.should_repair().unwrap());
        idx.repair_height_index(&CancellationToken::new()).unwrap();

        idx.reset_height_index().unwrap();
        let persisted = State::new(f.base.clone());
        assert_eq!(persisted.get_block_id_at_height(2).unwrap(), None);
        assert_eq!(persisted.get_fork_height().unwrap(), None);
        assert!(f.base.keys_with_prefix(b"height/").unwrap().is_empty());
    }
}
