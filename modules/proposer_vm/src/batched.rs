//! Batched block transfer: ancestor walks for peers syncing from this node
//! and parsing of the batches they send back.

use std::time::{Duration, Instant};

use slotgate_common::BlockId;

use crate::{
    block::{Block, PreForkBlock},
    error::VmResult,
    ProposerVm,
};

/// Per-container overhead counted against the response size
const LENGTH_PREFIX_SIZE: usize = 4;

impl ProposerVm {
    /// Bytes of `id` and its ancestors, newest first. Walks this layer's
    /// blocks, then carries on through the inner chain past the fork.
    ///
    /// The first block is always returned. Later ones stop once `max_count`
    /// blocks, `max_size` bytes or `max_time` is reached.
    pub fn get_ancestors(
        &self,
        id: BlockId,
        max_count: usize,
        max_size: usize,
        max_time: Duration,
    ) -> VmResult<Vec<Vec<u8>>> {
        let started = Instant::now();
        let mut ancestors = Vec::new();
        let mut size = 0usize;
        let mut current = id;

        while let Some(blk) = self.get_post_fork_block(&current)? {
            let bytes = blk.bytes();
            size += LENGTH_PREFIX_SIZE + bytes.len();
            if !ancestors.is_empty() && (size >= max_size || started.elapsed() >= max_time) {
                return Ok(ancestors);
            }
            ancestors.push(bytes.to_vec());
            current = blk.parent();
            if ancestors.len() >= max_count {
                return Ok(ancestors);
            }
        }

        // Past the fork, or `id` was never post-fork
        loop {
            let inner = match self.inner.get_block(&current) {
                Ok(inner) => inner,
                Err(e) if ancestors.is_empty() => return Err(e.into()),
                Err(_) => return Ok(ancestors),
            };
            let bytes = inner.bytes();
            size += LENGTH_PREFIX_SIZE + bytes.len();
            if !ancestors.is_empty() && (size >= max_size || started.elapsed() >= max_time) {
                return Ok(ancestors);
            }
            ancestors.push(bytes);
            current = inner.parent();
            if ancestors.len() >= max_count {
                return Ok(ancestors);
            }
        }
    }

    /// Parse a newest-first batch. Once one entry is not a post-fork
    /// envelope every later entry is taken as an inner block.
    pub fn batched_parse_block(&self, blocks: &[Vec<u8>]) -> VmResult<Vec<Block>> {
        let mut parsed = Vec::with_capacity(blocks.len());
        for (i, bytes) in blocks.iter().enumerate() {
            let Ok(stateless) = slotgate_codec::parse(bytes) else {
                for bytes in &blocks[i..] {
                    let inner = self.inner.parse_block(bytes)?;
                    parsed.push(Block::PreFork(PreForkBlock::new(inner)));
                }
                break;
            };
            parsed.push(Block::PostFork(self.parse_post_fork_block(stateless)?));
        }
        Ok(parsed)
    }
}
