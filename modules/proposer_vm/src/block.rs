//! Blocks as the consensus engine sees them through the proposer VM.
//!
//! A [`Block`] is either a pre-fork pass-through of an inner block, or a
//! post-fork wrapper (signed or option) around one. Behaviour that needs VM
//! state lives on the VM, in the per-variant modules.

use std::sync::{Arc, PoisonError, RwLock};

use slotgate_codec::StatelessBlock;
use slotgate_common::{BlockId, BlockStatus, InnerBlockRef};

#[derive(Debug, Clone)]
pub enum Block {
    PreFork(PreForkBlock),
    PostFork(Arc<PostForkBlock>),
}

/// Inner block from before activation; status is the inner chain's own
#[derive(Debug, Clone)]
pub struct PreForkBlock {
    inner: InnerBlockRef,
}

impl PreForkBlock {
    pub fn new(inner: InnerBlockRef) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &InnerBlockRef {
        &self.inner
    }
}

/// A signed or option envelope with its decoded inner block.
///
/// The inner block may be rebound to an equivalent instance already
/// verified through another wrapper.
#[derive(Debug)]
pub struct PostForkBlock {
    stateless: StatelessBlock,
    inner: RwLock<InnerBlockRef>,
    status: RwLock<BlockStatus>,
}

impl PostForkBlock {
    pub(crate) fn new(
        stateless: StatelessBlock,
        inner: InnerBlockRef,
        status: BlockStatus,
    ) -> Arc<Self> {
        Arc::new(Self {
            stateless,
            inner: RwLock::new(inner),
            status: RwLock::new(status),
        })
    }

    pub fn id(&self) -> BlockId {
        self.stateless.id()
    }

    pub fn parent(&self) -> BlockId {
        self.stateless.parent_id()
    }

    pub fn height(&self) -> u64 {
        self.inner().height()
    }

    pub fn status(&self) -> BlockStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_status(&self, status: BlockStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn inner(&self) -> InnerBlockRef {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_inner(&self, inner: InnerBlockRef) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = inner;
    }

    pub fn stateless(&self) -> &StatelessBlock {
        &self.stateless
    }

    pub fn bytes(&self) -> &[u8] {
        self.stateless.bytes()
    }

    pub fn is_option(&self) -> bool {
        self.stateless.is_option()
    }
}

impl Block {
    pub fn id(&self) -> BlockId {
        match self {
            Self::PreFork(b) => b.inner.id(),
            Self::PostFork(b) => b.id(),
        }
    }

    pub fn parent(&self) -> BlockId {
        match self {
            Self::PreFork(b) => b.inner.parent(),
            Self::PostFork(b) => b.parent(),
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            Self::PreFork(b) => b.inner.height(),
            Self::PostFork(b) => b.height(),
        }
    }

    pub fn status(&self) -> BlockStatus {
        match self {
            Self::PreFork(b) => b.inner.status(),
            Self::PostFork(b) => b.status(),
        }
    }

    pub fn inner(&self) -> InnerBlockRef {
        match self {
            Self::PreFork(b) => b.inner.clone(),
            Self::PostFork(b) => b.inner(),
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::PreFork(b) => b.inner.bytes(),
            Self::PostFork(b) => b.bytes().to_vec(),
        }
    }

    pub fn as_post_fork(&self) -> Option<&Arc<PostForkBlock>> {
        match self {
            Self::PreFork(_) => None,
            Self::PostFork(b) => Some(b),
        }
    }
}
