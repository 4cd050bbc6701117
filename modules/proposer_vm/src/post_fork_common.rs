//! Rules shared by signed and option post-fork blocks acting as parents,
//! along with their accept and reject handling.

use std::sync::Arc;

use slotgate_codec::{build_signed, build_unsigned, StatelessBlock};
use slotgate_common::{BlockStatus, InnerBlockRef, NodeId};
use tracing::{debug, info};

use crate::{
    block::{Block, PostForkBlock},
    clock::truncate_to_second,
    error::{VmError, VmResult},
    windower::MAX_DELAY,
    ProposerVm, MAX_SKEW,
};

impl ProposerVm {
    /// Checks for a signed child of a post-fork `parent`
    pub(crate) fn post_fork_verify_post_fork_child(
        &mut self,
        parent: &Arc<PostForkBlock>,
        child: &Arc<PostForkBlock>,
    ) -> VmResult<()> {
        let StatelessBlock::Signed(signed) = child.stateless() else {
            return Err(VmError::UnexpectedBlockType);
        };

        // Children of an oracle must be its options
        let parent_inner = parent.inner();
        if parent_inner.options()?.is_some() {
            return Err(VmError::UnexpectedBlockType);
        }

        let parent_timestamp = self.post_fork_timestamp(parent)?;
        let parent_p_chain_height = self.post_fork_p_chain_height(parent)?;

        let height = signed.p_chain_height();
        if height < parent_p_chain_height {
            return Err(VmError::PChainHeightNotMonotonic);
        }

        if child.inner().parent() != parent_inner.id() {
            return Err(VmError::InnerParentMismatch);
        }

        let timestamp = signed.timestamp();
        if timestamp < parent_timestamp {
            return Err(VmError::TimeNotMonotonic);
        }
        if timestamp > self.clock.time() + MAX_SKEW {
            return Err(VmError::TimeTooAdvanced);
        }

        // While bootstrapping the validator state may lag behind the chain
        if self.bootstrapped {
            let current = self.ctx.validator_state.get_current_height()?;
            if height > current {
                return Err(VmError::PChainHeightNotReached { height, current });
            }

            let proposer = signed.proposer().unwrap_or(NodeId::EMPTY);
            let min_delay = self.windower.delay(child.height(), parent_p_chain_height, &proposer)?;
            let delay = timestamp.duration_since(parent_timestamp).unwrap_or_default();
            if delay < min_delay {
                return Err(VmError::ProposerWindowNotStarted);
            }

            let should_have_proposer = delay < MAX_DELAY;
            match signed.proposer() {
                Some(_) if !should_have_proposer => return Err(VmError::UnexpectedProposer),
                Some(_) if signed.signature().is_empty() => return Err(VmError::MissingProposer),
                None if should_have_proposer => return Err(VmError::MissingProposer),
                _ => {}
            }
        }

        self.verify_and_record_inner_blk(child)
    }

    /// Build on a post-fork `parent`, signing when inside the proposer windows
    pub(crate) fn build_post_fork_child(&mut self, parent: &Arc<PostForkBlock>) -> VmResult<Block> {
        let parent_timestamp = self.post_fork_timestamp(parent)?;
        let parent_p_chain_height = self.post_fork_p_chain_height(parent)?;

        let timestamp = truncate_to_second(self.clock.time()).max(parent_timestamp);
        let p_chain_height = self.optimal_p_chain_height(parent_p_chain_height)?;

        let delay = timestamp.duration_since(parent_timestamp).unwrap_or_default();
        let signed = delay < MAX_DELAY;
        if signed {
            let min_delay =
                self.windower.delay(parent.height() + 1, parent_p_chain_height, &self.ctx.node_id)?;
            if delay < min_delay {
                debug!(
                    parent = %parent.id(),
                    ?delay,
                    ?min_delay,
                    "build block dropped, proposer window not started"
                );
                // The inner chain may only have notified once
                self.notify_inner_block_ready();
                return Err(VmError::ProposerWindowNotStarted);
            }
        }

        let inner = self.inner.build_block()?;
        let stateless = if signed {
            let signer = self.ctx.signer.clone();
            build_signed::<_, VmError>(
                parent.id(),
                timestamp,
                p_chain_height,
                self.ctx.node_id,
                &self.ctx.chain_id,
                &inner.bytes(),
                |digest| Ok(signer.sign(digest)?),
            )?
        } else {
            build_unsigned(parent.id(), timestamp, p_chain_height, &inner.bytes())?
        };

        let blk =
            PostForkBlock::new(StatelessBlock::Signed(stateless), inner, BlockStatus::Processing);
        self.verify_and_record_inner_blk(&blk)?;
        info!(
            block = %blk.id(),
            inner = %blk.inner().id(),
            height = blk.height(),
            p_chain_height,
            signed,
            "built block"
        );
        Ok(Block::PostFork(blk))
    }

    /// Persist `blk` as the last accepted block, then accept its inner block
    /// and reject the conflicting ones
    pub(crate) fn accept_post_fork(&mut self, blk: &Arc<PostForkBlock>) -> VmResult<()> {
        let id = blk.id();
        if let StatelessBlock::Signed(signed) = blk.stateless() {
            self.last_accepted_time = Some(signed.timestamp());
        }
        blk.set_status(BlockStatus::Accepted);
        self.verified_blocks.remove(&id);

        self.state.set_last_accepted(&id)?;
        self.store_post_fork_block(blk)?;

        self.tree.accept(&blk.inner())?;
        debug!(block = %id, height = blk.height(), "accepted block");
        Ok(())
    }

    /// Drop from the ledger. The inner block stays undecided since another
    /// wrapper around it may still be accepted.
    pub(crate) fn reject_post_fork(&mut self, blk: &PostForkBlock) {
        self.verified_blocks.remove(&blk.id());
        blk.set_status(BlockStatus::Rejected);
    }

    /// Wrap the inner options of a signed block
    pub(crate) fn post_fork_options(&self, blk: &Arc<PostForkBlock>) -> VmResult<[Block; 2]> {
        if blk.is_option() {
            return Err(VmError::NotOracle);
        }
        let [first, second] = blk.inner().options()?.ok_or(VmError::NotOracle)?;
        Ok([self.wrap_option(blk, first)?, self.wrap_option(blk, second)?])
    }

    fn wrap_option(&self, parent: &PostForkBlock, inner: InnerBlockRef) -> VmResult<Block> {
        let stateless = slotgate_codec::build_option(parent.id(), &inner.bytes())?;
        if let Some(existing) = self.get_post_fork_block(&stateless.id())? {
            return Ok(Block::PostFork(existing));
        }
        Ok(Block::PostFork(PostForkBlock::new(
            StatelessBlock::Option(stateless),
            inner,
            BlockStatus::Processing,
        )))
    }
}
