//! Proposer slot assignment.
//!
//! For each chain height up to [`MAX_WINDOWS`] stake units are drawn without
//! replacement, so a heavy validator may hold several windows. A proposer
//! may build once `i * WINDOW_DURATION` has passed since the parent, `i`
//! being its first window; anyone else waits until every sampled window has
//! opened.

use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use slotgate_common::{ChainError, ChainId, ChainResult, NodeId, SubnetId, ValidatorState};

pub const WINDOW_DURATION: Duration = Duration::from_secs(5);
pub const MAX_WINDOWS: usize = 6;
pub const MAX_DELAY: Duration = Duration::from_secs(5 * MAX_WINDOWS as u64);

pub trait Windower: Send + Sync {
    /// Minimum time after the parent's timestamp before `node_id` may
    /// propose the block at `chain_height`
    fn delay(
        &self,
        chain_height: u64,
        p_chain_height: u64,
        node_id: &NodeId,
    ) -> ChainResult<Duration>;
}

pub struct ProposerWindower {
    state: Arc<dyn ValidatorState>,
    subnet_id: SubnetId,
    chain_source: u64,
}

impl ProposerWindower {
    pub fn new(state: Arc<dyn ValidatorState>, subnet_id: SubnetId, chain_id: ChainId) -> Self {
        Self {
            state,
            subnet_id,
            chain_source: chain_id.fold_u64(),
        }
    }
}

impl Windower for ProposerWindower {
    fn delay(
        &self,
        chain_height: u64,
        p_chain_height: u64,
        node_id: &NodeId,
    ) -> ChainResult<Duration> {
        if node_id.is_empty() {
            return Ok(MAX_DELAY);
        }

        let validators = self.state.get_validator_set(p_chain_height, &self.subnet_id)?;
        let mut candidates: Vec<(NodeId, u64)> =
            validators.into_iter().filter(|(_, weight)| *weight > 0).collect();
        let mut total = candidates
            .iter()
            .try_fold(0u64, |acc, (_, weight)| acc.checked_add(*weight))
            .ok_or_else(|| ChainError::Other(anyhow::anyhow!("validator weights overflow")))?;

        let mut rng = StdRng::seed_from_u64(chain_height ^ self.chain_source);
        let windows = total.min(MAX_WINDOWS as u64);
        let mut delay = Duration::ZERO;
        for _ in 0..windows {
            let mut pick = rng.random_range(0..total);
            let Some(index) = candidates.iter().position(|(_, weight)| {
                if pick < *weight {
                    true
                } else {
                    pick -= *weight;
                    false
                }
            }) else {
                break;
            };
            if candidates[index].0 == *node_id {
                return Ok(delay);
            }

            // One stake unit leaves the pool per window
            candidates[index].1 -= 1;
            if candidates[index].1 == 0 {
                candidates.remove(index);
            }
            total -= 1;
            delay += WINDOW_DURATION;
        }
        Ok(delay)
    }
}
