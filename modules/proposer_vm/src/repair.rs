//! Start-up reconciliation of this layer's accepted chain with the inner
//! chain's.
//!
//! A crash between committing a post-fork acceptance and the inner chain
//! committing its own leaves this layer ahead. Such blocks are demoted back
//! to processing until the last accepted block wraps an inner block the
//! inner chain also holds as accepted.

use slotgate_codec::StatelessBlock;
use slotgate_common::BlockStatus;
use tracing::{debug, info};

use crate::{error::VmResult, ProposerVm};

impl ProposerVm {
    pub(crate) fn repair_accepted_chain(&mut self) -> VmResult<()> {
        let Some(mut last_accepted_id) = self.state.get_last_accepted()? else {
            // Nothing past the fork yet, the inner chain is the only chain
            return Ok(());
        };

        let mut demoted = 0usize;
        loop {
            let Some(last_accepted) = self.get_post_fork_block(&last_accepted_id)? else {
                // Reverted past the fork: only the inner chain is left
                info!(demoted, "accepted chain rolled back past the fork");
                self.state.delete_last_accepted()?;
                self.state.delete_checkpoint()?;
                self.state.delete_fork_height()?;
                self.db.commit()?;
                return Ok(());
            };

            if last_accepted.inner().status() == BlockStatus::Accepted {
                if demoted > 0 {
                    info!(demoted, last_accepted = %last_accepted_id, "repaired accepted chain");
                }
                self.db.commit()?;
                return Ok(());
            }

            debug!(block = %last_accepted_id, height = last_accepted.height(), "demoting block");
            self.state.put_block(last_accepted.stateless(), BlockStatus::Processing)?;

            let height = last_accepted.height();
            if self.state.get_block_id_at_height(height)? == Some(last_accepted_id) {
                self.state.delete_block_id_at_height(height)?;
            }

            let previous = last_accepted_id;
            last_accepted_id = last_accepted.parent();
            self.state.set_last_accepted(&last_accepted_id)?;

            // Keep the indexer checkpoint on an accepted block
            if self.state.get_checkpoint()? == Some(previous) {
                self.state.set_checkpoint(&last_accepted_id)?;
            }
            demoted += 1;
        }
    }

    /// Restore the timestamp an accepted option block reports
    pub(crate) fn set_last_accepted_option_time(&mut self) -> VmResult<()> {
        let Some(last_accepted_id) = self.state.get_last_accepted()? else {
            return Ok(());
        };
        let last_accepted = self.get_required_post_fork_block(&last_accepted_id)?;

        let signed = match last_accepted.stateless() {
            StatelessBlock::Signed(_) => last_accepted,
            StatelessBlock::Option(_) => {
                self.get_required_post_fork_block(&last_accepted.parent())?
            }
        };
        self.last_accepted_time = Some(self.post_fork_timestamp(&signed)?);
        Ok(())
    }
}
