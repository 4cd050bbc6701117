//! Blocks from before activation, and the hand-over to post-fork blocks.

use std::sync::Arc;

use slotgate_codec::{build_unsigned, StatelessBlock};
use slotgate_common::BlockStatus;
use tracing::{debug, info};

use crate::{
    block::{Block, PostForkBlock, PreForkBlock},
    clock::truncate_to_second,
    error::{VmError, VmResult},
    ProposerVm, MAX_SKEW,
};

impl ProposerVm {
    pub(crate) fn verify_pre_fork(&mut self, blk: &PreForkBlock) -> VmResult<()> {
        let inner = blk.inner();
        let parent = self.inner.get_block(&inner.parent())?;

        // Past activation only the options of a pre-fork oracle stay pre-fork
        if parent.timestamp() >= self.activation_time {
            if parent.options()?.is_none() {
                return Err(VmError::ProposersActivated);
            }
            debug!(block = %inner.id(), "allowing pre-fork option after activation");
        }
        Ok(inner.verify()?)
    }

    pub(crate) fn accept_pre_fork(&mut self, blk: &PreForkBlock) -> VmResult<()> {
        Ok(blk.inner().accept()?)
    }

    pub(crate) fn reject_pre_fork(&mut self, blk: &PreForkBlock) -> VmResult<()> {
        Ok(blk.inner().reject()?)
    }

    pub(crate) fn pre_fork_options(&self, blk: &PreForkBlock) -> VmResult<[Block; 2]> {
        let [first, second] = blk.inner().options()?.ok_or(VmError::NotOracle)?;
        Ok([
            Block::PreFork(PreForkBlock::new(first)),
            Block::PreFork(PreForkBlock::new(second)),
        ])
    }

    /// Checks for the first post-fork block, built on the last pre-fork one
    pub(crate) fn pre_fork_verify_post_fork_child(
        &mut self,
        parent: &PreForkBlock,
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

        let height = signed.p_chain_height();
        let current = self.ctx.validator_state.get_current_height()?;
        if height > current {
            return Err(VmError::PChainHeightNotReached { height, current });
        }
        if height < self.minimum_p_chain_height {
            return Err(VmError::PChainHeightTooLow {
                height,
                minimum: self.minimum_p_chain_height,
            });
        }

        if child.inner().parent() != parent_inner.id() {
            return Err(VmError::InnerParentMismatch);
        }

        let parent_timestamp = parent_inner.timestamp();
        if parent_timestamp < self.activation_time {
            return Err(VmError::ProposersNotActivated);
        }

        let timestamp = signed.timestamp();
        if timestamp < parent_timestamp {
            return Err(VmError::TimeNotMonotonic);
        }
        if timestamp > self.clock.time() + MAX_SKEW {
            return Err(VmError::TimeTooAdvanced);
        }

        if signed.proposer().is_some() {
            return Err(VmError::UnexpectedProposer);
        }

        self.verify_and_record_inner_blk(child)
    }

    pub(crate) fn build_pre_fork_child(&mut self, parent: &PreForkBlock) -> VmResult<Block> {
        let parent_timestamp = parent.inner().timestamp();
        if parent_timestamp < self.activation_time {
            let inner = self.inner.build_block()?;
            debug!(block = %inner.id(), "built pre-fork block");
            return Ok(Block::PreFork(PreForkBlock::new(inner)));
        }

        // Forking: the child is the first post-fork block, unsigned
        let timestamp = truncate_to_second(self.clock.time()).max(parent_timestamp);
        let p_chain_height = self.optimal_p_chain_height(self.minimum_p_chain_height)?;
        let inner = self.inner.build_block()?;
        let stateless =
            build_unsigned(parent.inner().id(), timestamp, p_chain_height, &inner.bytes())?;
        let blk =
            PostForkBlock::new(StatelessBlock::Signed(stateless), inner, BlockStatus::Processing);
        self.verify_and_record_inner_blk(&blk)?;

        info!(
            block = %blk.id(),
            inner = %blk.inner().id(),
            height = blk.height(),
            p_chain_height,
            "built first post-fork block"
        );
        Ok(Block::PostFork(blk))
    }
}
