//! Typed access to the proposer VM metadata store.
//!
//! Lookups return `Ok(None)` for absent records. Writes land in whatever
//! database backs the state; callers wanting atomicity hand in a
//! `VersionDb` and commit it themselves.

use crate::database::Database;
use slotgate_common::{BlockId, StoreError};
use std::sync::Arc;

mod block_state;
mod chain_state;
mod index_state;

const BLOCK_PREFIX: &[u8] = b"block/";
const LAST_ACCEPTED_KEY: &[u8] = b"chain/last-accepted";
const CHECKPOINT_KEY: &[u8] = b"index/checkpoint";
const FORK_HEIGHT_KEY: &[u8] = b"index/fork-height";
const HEIGHT_PREFIX: &[u8] = b"height/";

#[derive(Clone)]
pub struct State {
    db: Arc<dyn Database>,
}

impl State {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    fn get_id(&self, key: &[u8]) -> Result<Option<BlockId>, StoreError> {
        let Some(value) = self.db.get(key)? else {
            return Ok(None);
        };
        let id = BlockId::try_from(value.as_slice())
            .map_err(|_| corrupt(key, "bad block id length"))?;
        Ok(Some(id))
    }
}

fn corrupt(key: &[u8], reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: reason.to_string(),
    }
}

fn keyed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    [prefix, suffix].concat()
}
