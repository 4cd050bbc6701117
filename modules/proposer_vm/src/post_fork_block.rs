//! Signed post-fork blocks.

use std::sync::Arc;

use crate::{
    block::PostForkBlock,
    error::{VmError, VmResult},
    ProposerVm,
};

impl ProposerVm {
    pub(crate) fn verify_signed(&mut self, blk: &Arc<PostForkBlock>) -> VmResult<()> {
        let parent = self.get_block(&blk.parent())?;
        self.verify_post_fork_child(&parent, blk)
    }

    /// Checks for an option child of the signed block `parent`
    pub(crate) fn signed_verify_post_fork_option(
        &mut self,
        parent: &Arc<PostForkBlock>,
        child: &Arc<PostForkBlock>,
    ) -> VmResult<()> {
        let parent_inner = parent.inner();
        if parent_inner.options()?.is_none() {
            return Err(VmError::NotOracle);
        }
        if child.inner().parent() != parent_inner.id() {
            return Err(VmError::InnerParentMismatch);
        }
        self.verify_and_record_inner_blk(child)
    }
}
