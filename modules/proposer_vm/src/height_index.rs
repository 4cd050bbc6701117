//! Height index maintenance: the background supervisor that rebuilds the
//! index once the inner chain's own index is complete, and the VM-side
//! lookups and updates.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use slotgate_common::{BlockId, ChainError, ChainResult, ChainVm};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    database::VersionDb,
    error::{VmError, VmResult},
    indexer::{BlockServer, HeightIndexer},
    state::State,
    ProposerVm,
};

/// The indexer's view of the VM. Every call that touches inner-chain or
/// shared VM state takes the engine lock.
pub(crate) struct VmBlockServer {
    inner: Arc<dyn ChainVm>,
    state: State,
    db: Arc<VersionDb>,
    lock: Arc<Mutex<()>>,
}

impl VmBlockServer {
    pub(crate) fn new(
        inner: Arc<dyn ChainVm>,
        state: State,
        db: Arc<VersionDb>,
        lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            inner,
            state,
            db,
            lock,
        }
    }
}

impl BlockServer for VmBlockServer {
    fn post_fork_block_height(&self, id: &BlockId) -> ChainResult<Option<u64>> {
        let Some((block, _)) = self.state.get_block(id)? else {
            return Ok(None);
        };
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Some(self.inner.parse_block(block.inner_bytes())?.height()))
    }

    fn commit(&self, overlay: &VersionDb) -> ChainResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        overlay.commit()?;
        Ok(self.db.commit()?)
    }
}

struct HeightIndexSupervisor {
    inner: Arc<dyn ChainVm>,
    indexer: Arc<HeightIndexer>,
    lock: Arc<Mutex<()>>,
    reset_ongoing: Arc<AtomicBool>,
    cancel: CancellationToken,
    frequency: Duration,
}

impl HeightIndexSupervisor {
    async fn run(self) {
        if let Err(e) = self.supervise().await {
            if self.cancel.is_cancelled() {
                debug!("height index supervisor stopped: {e}");
            } else {
                error!("height index supervisor failed: {e}");
            }
        }
    }

    async fn supervise(&self) -> ChainResult<()> {
        if self.inner.height_index().is_none() {
            info!("inner chain keeps no height index, height lookups disabled");
            return Ok(());
        }

        if self.reset_ongoing.load(Ordering::Acquire) {
            let indexer = self.indexer.clone();
            spawn_blocking(move || indexer.reset_height_index())
                .await
                .map_err(|e| ChainError::Other(e.into()))??;
            self.reset_ongoing.store(false, Ordering::Release);
            info!("height index reset");
        }

        // First tick fires immediately
        let mut ticker = tokio::time::interval(self.frequency);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            let inner = self.inner.clone();
            let lock = self.lock.clone();
            let complete = spawn_blocking(move || inner_index_complete(inner.as_ref(), &lock))
                .await
                .map_err(|e| ChainError::Other(e.into()))?;
            match complete {
                Ok(()) => break,
                Err(ChainError::IndexIncomplete) => {
                    debug!("inner height index incomplete, retrying in {:?}", self.frequency)
                }
                Err(e) => return Err(e),
            }
        }

        let indexer = self.indexer.clone();
        let cancel = self.cancel.clone();
        spawn_blocking(move || {
            if !indexer.should_repair()? {
                indexer.mark_repaired(true);
                info!("height index complete");
                return Ok(());
            }
            info!("rebuilding height index");
            indexer.repair_height_index(&cancel)
        })
        .await
        .map_err(|e| ChainError::Other(e.into()))?
    }
}

/// Ask the inner chain, under the engine lock, whether its index is complete
fn inner_index_complete(inner: &dyn ChainVm, lock: &Mutex<()>) -> ChainResult<()> {
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    match inner.height_index() {
        Some(indexed) => indexed.verify_height_index(),
        None => Err(ChainError::HeightIndexNotSupported),
    }
}

impl ProposerVm {
    pub(crate) fn launch_height_index_supervisor(&mut self) {
        let supervisor = HeightIndexSupervisor {
            inner: self.inner.clone(),
            indexer: self.indexer.clone(),
            lock: self.ctx.lock.clone(),
            reset_ongoing: self.reset_height_index_ongoing.clone(),
            cancel: self.cancel.clone(),
            frequency: self.check_indexed_frequency,
        };
        self.supervisor = Some(tokio::spawn(supervisor.run()));
    }

    /// Index an accepted block, unless a rebuild will cover it
    pub(crate) fn update_height_index(&self, height: u64, id: &BlockId) -> VmResult<()> {
        if self.reset_height_index_ongoing.load(Ordering::Acquire) {
            return Ok(());
        }
        // No checkpoint and not repaired: the rebuild has yet to start
        if self.state.get_checkpoint()?.is_none() && !self.indexer.is_repaired() {
            return Ok(());
        }

        self.state.set_block_id_at_height(height, id)?;
        if self.state.get_fork_height()?.is_none() {
            self.state.set_fork_height(height)?;
            info!(fork_height = height, "recorded fork height");
        }
        Ok(())
    }

    /// `Ok` once lookups by height can be served
    pub fn verify_height_index(&self) -> VmResult<()> {
        if self.inner.height_index().is_none() {
            return Err(ChainError::HeightIndexNotSupported.into());
        }
        if self.reset_height_index_ongoing.load(Ordering::Acquire) || !self.indexer.is_repaired() {
            return Err(ChainError::IndexIncomplete.into());
        }
        Ok(())
    }

    /// Accepted block at `height`: from this layer's index at or above the
    /// fork height, from the inner chain below it
    pub fn get_block_id_at_height(&self, height: u64) -> VmResult<BlockId> {
        self.verify_height_index()?;
        let indexed = self
            .inner
            .height_index()
            .ok_or(VmError::Chain(ChainError::HeightIndexNotSupported))?;

        match self.state.get_fork_height()? {
            Some(fork_height) if height >= fork_height => self
                .state
                .get_block_id_at_height(height)?
                .ok_or(VmError::Chain(ChainError::NotFound)),
            _ => Ok(indexed.get_block_id_at_height(height)?),
        }
    }
}
