use std::sync::Arc;

use slotgate_common::StoreError;

use super::{BatchOp, Database};

/// Scopes every key of an underlying database under a fixed prefix
pub struct PrefixDb {
    prefix: Vec<u8>,
    db: Arc<dyn Database>,
}

impl PrefixDb {
    pub fn new(prefix: &[u8], db: Arc<dyn Database>) -> Self {
        Self {
            prefix: prefix.to_vec(),
            db,
        }
    }

    fn scoped(&self, key: &[u8]) -> Vec<u8> {
        let mut scoped = Vec::with_capacity(self.prefix.len() + key.len());
        scoped.extend_from_slice(&self.prefix);
        scoped.extend_from_slice(key);
        scoped
    }
}

impl Database for PrefixDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db.get(&self.scoped(key))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let ops = ops.into_iter().map(|(key, value)| (self.scoped(&key), value)).collect();
        self.db.write_batch(ops)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let keys = self.db.keys_with_prefix(&self.scoped(prefix))?;
        Ok(keys.into_iter().map(|key| key[self.prefix.len()..].to_vec()).collect())
    }
}
