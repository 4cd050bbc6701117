//! Option blocks: unsigned wrappers around one child of an oracle block.
//!
//! An option carries neither a timestamp nor a validator-set height of its
//! own; both come from the signed parent.

use std::{sync::Arc, time::SystemTime};

use slotgate_common::BlockStatus;

use crate::{block::PostForkBlock, error::VmResult, ProposerVm};

impl ProposerVm {
    pub(crate) fn verify_option(&mut self, blk: &Arc<PostForkBlock>) -> VmResult<()> {
        let parent = self.get_block(&blk.parent())?;
        self.verify_post_fork_option(&parent, blk)
    }

    /// Once accepted, the time recorded when its parent was accepted
    pub(crate) fn option_timestamp(&self, blk: &PostForkBlock) -> VmResult<SystemTime> {
        if blk.status() == BlockStatus::Accepted {
            if let Some(time) = self.last_accepted_time {
                return Ok(time);
            }
        }
        let parent = self.get_required_post_fork_block(&blk.parent())?;
        self.post_fork_timestamp(&parent)
    }

    pub(crate) fn option_p_chain_height(&self, blk: &PostForkBlock) -> VmResult<u64> {
        let parent = self.get_required_post_fork_block(&blk.parent())?;
        self.post_fork_p_chain_height(&parent)
    }
}
