use super::{State, LAST_ACCEPTED_KEY};
use slotgate_common::{BlockId, StoreError};

impl State {
    pub fn get_last_accepted(&self) -> Result<Option<BlockId>, StoreError> {
        self.get_id(LAST_ACCEPTED_KEY)
    }

    pub fn set_last_accepted(&self, id: &BlockId) -> Result<(), StoreError> {
        self.db.put(LAST_ACCEPTED_KEY, id.as_ref())
    }

    pub fn delete_last_accepted(&self) -> Result<(), StoreError> {
        self.db.delete(LAST_ACCEPTED_KEY)
    }
}
