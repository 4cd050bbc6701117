//! Verified inner blocks grouped by parent, used to verify each inner block
//! at most once however many post-fork wrappers reach it.

use std::collections::HashMap;

use slotgate_common::{BlockId, ChainResult, InnerBlockRef};

/// Processing inner blocks keyed by parent id, then by their own id.
///
/// Single-threaded; the owning VM is driven under the engine lock.
#[derive(Default)]
pub struct Tree {
    nodes: HashMap<BlockId, HashMap<BlockId, InnerBlockRef>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracked instance equivalent to `blk`, if any
    pub fn get(&self, blk: &InnerBlockRef) -> Option<InnerBlockRef> {
        self.nodes.get(&blk.parent())?.get(&blk.id()).cloned()
    }

    pub fn add(&mut self, blk: InnerBlockRef) {
        self.nodes.entry(blk.parent()).or_default().insert(blk.id(), blk);
    }

    /// Accept `blk` and reject every sibling along with its tracked
    /// descendants. The accepted block's own children stay tracked.
    pub fn accept(&mut self, blk: &InnerBlockRef) -> ChainResult<()> {
        blk.accept()?;

        let Some(mut siblings) = self.nodes.remove(&blk.parent()) else {
            return Ok(());
        };
        siblings.remove(&blk.id());

        let mut queue: Vec<InnerBlockRef> = siblings.into_values().collect();
        while let Some(conflicting) = queue.pop() {
            conflicting.reject()?;
            if let Some(children) = self.nodes.remove(&conflicting.id()) {
                queue.extend(children.into_values());
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
