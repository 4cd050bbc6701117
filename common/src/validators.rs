//! Access to the validator registry of the coordinating chain
use crate::{
    error::ChainResult,
    id::{NodeId, SubnetId},
};
use std::collections::BTreeMap;

/// Validator weights ordered by node id
pub type ValidatorSet = BTreeMap<NodeId, u64>;

/// Read access to validator sets, indexed by coordinating-chain height
pub trait ValidatorState: Send + Sync {
    /// Height of the coordinating chain this node has reached
    fn get_current_height(&self) -> ChainResult<u64>;

    /// Validators of `subnet_id` as of `height`
    fn get_validator_set(&self, height: u64, subnet_id: &SubnetId) -> ChainResult<ValidatorSet>;
}
