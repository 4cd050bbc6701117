use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};

use slotgate_common::StoreError;

use super::{BatchOp, Database};

/// Holds writes in memory until `commit` applies them to the backing
/// database as one batch.
pub struct VersionDb {
    db: Arc<dyn Database>,
    pending: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl VersionDb {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Write all pending operations atomically. On failure they stay pending.
    pub fn commit(&self) -> Result<(), StoreError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            return Ok(());
        }
        let ops = pending.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
        self.db.write_batch(ops)?;
        pending.clear();
        Ok(())
    }

    /// Drop all pending operations
    pub fn abort(&self) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

impl Database for VersionDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).get(key) {
            return Ok(value.clone());
        }
        self.db.get(key)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).extend(ops);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut keys: BTreeSet<Vec<u8>> = self.db.keys_with_prefix(prefix)?.into_iter().collect();
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let in_range = pending.range(prefix.to_vec()..).take_while(|(k, _)| k.starts_with(prefix));
        for (key, value) in in_range {
            match value {
                Some(_) => keys.insert(key.clone()),
                None => keys.remove(key),
            };
        }
        Ok(keys.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemDatabase;

    #[test]
    fn writes_stay_pending_until_commit() {
        let base = Arc::new(MemDatabase::new());
        let db = VersionDb::new(base.clone());
        db.put(b"k", b"v").unwrap();

        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(base.get(b"k").unwrap(), None);

        db.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(!db.has_pending());
    }

    #[test]
    fn pending_delete_hides_committed_key() {
        let base = Arc::new(MemDatabase::new());
        base.put(b"p/1", b"a").unwrap();
        base.put(b"p/2", b"b").unwrap();
        let db = VersionDb::new(base.clone());
        db.delete(b"p/1").unwrap();
        db.put(b"p/3", b"c").unwrap();

        assert_eq!(db.get(b"p/1").unwrap(), None);
        assert_eq!(
            db.keys_with_prefix(b"p/").unwrap(),
            vec![b"p/2".to_vec(), b"p/3".to_vec()]
        );
    }

    #[test]
    fn failed_commit_keeps_pending() {
        let base = Arc::new(MemDatabase::new());
        let db = VersionDb::new(base.clone());
        db.put(b"k", b"v").unwrap();

        base.set_fail_writes(true);
        assert!(db.commit().is_err());
        assert!(db.has_pending());

        base.set_fail_writes(false);
        db.commit().unwrap();
        assert_eq!(base.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn abort_discards_pending() {
        let base = Arc::new(MemDatabase::new());
        let db = VersionDb::new(base.clone());
        db.put(b"k", b"v").unwrap();
        db.abort();
        db.commit().unwrap();
        assert!(base.is_empty());
    }
}
