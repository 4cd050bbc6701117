use super::{corrupt, keyed, State, CHECKPOINT_KEY, FORK_HEIGHT_KEY, HEIGHT_PREFIX};
use slotgate_common::{BlockId, StoreError};

impl State {
    /// Block the height index rebuild resumes from
    pub fn get_checkpoint(&self) -> Result<Option<BlockId>, StoreError> {
        self.get_id(CHECKPOINT_KEY)
    }

    pub fn set_checkpoint(&self, id: &BlockId) -> Result<(), StoreError> {
        self.db.put(CHECKPOINT_KEY, id.as_ref())
    }

    pub fn delete_checkpoint(&self) -> Result<(), StoreError> {
        self.db.delete(CHECKPOINT_KEY)
    }

    /// Height of the first post-fork block
    pub fn get_fork_height(&self) -> Result<Option<u64>, StoreError> {
        let Some(value) = self.db.get(FORK_HEIGHT_KEY)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = value
            .as_slice()
            .try_into()
            .map_err(|_| corrupt(FORK_HEIGHT_KEY, "bad height length"))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    pub fn set_fork_height(&self, height: u64) -> Result<(), StoreError> {
        self.db.put(FORK_HEIGHT_KEY, &height.to_be_bytes())
    }

    pub fn delete_fork_height(&self) -> Result<(), StoreError> {
        self.db.delete(FORK_HEIGHT_KEY)
    }

    pub fn get_block_id_at_height(&self, height: u64) -> Result<Option<BlockId>, StoreError> {
        self.get_id(&keyed(HEIGHT_PREFIX, &height.to_be_bytes()))
    }

    pub fn set_block_id_at_height(&self, height: u64, id: &BlockId) -> Result<(), StoreError> {
        self.db.put(&keyed(HEIGHT_PREFIX, &height.to_be_bytes()), id.as_ref())
    }

    pub fn delete_block_id_at_height(&self, height: u64) -> Result<(), StoreError> {
        self.db.delete(&keyed(HEIGHT_PREFIX, &height.to_be_bytes()))
    }

    /// Erase every height entry, the checkpoint and the fork height in one batch
    pub fn reset_height_index(&self) -> Result<(), StoreError> {
        let mut ops: Vec<_> = self
            .db
            .keys_with_prefix(HEIGHT_PREFIX)?
            .into_iter()
            .map(|key| (key, None))
            .collect();
        ops.push((CHECKPOINT_KEY.to_vec(), None));
        ops.push((FORK_HEIGHT_KEY.to_vec(), None));
        self.db.write_batch(ops)
    }
}
