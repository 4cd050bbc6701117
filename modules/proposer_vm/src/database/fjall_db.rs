use std::path::Path;

use anyhow::Result;
use config::Config;
use fjall::{Database as FjallKeyspaces, Keyspace, KeyspaceCreateOptions, PersistMode};
use slotgate_common::StoreError;

use super::{BatchOp, Database};

const DEFAULT_DATABASE_PATH: &str = "fjall-proposervm";
const METADATA_KEYSPACE: &str = "proposervm-metadata";

/// Durable database over a single fjall keyspace
pub struct FjallDatabase {
    database: FjallKeyspaces,
    metadata: Keyspace,
}

impl FjallDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let database = FjallKeyspaces::builder(path.as_ref()).open()?;
        let metadata = database.keyspace(METADATA_KEYSPACE, KeyspaceCreateOptions::default)?;
        Ok(Self { database, metadata })
    }

    pub fn open_from_config(config: &Config) -> Result<Self> {
        let path = config
            .get_string("database-path")
            .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());
        Self::open(path)
    }
}

impl Database for FjallDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.metadata.get(key).map_err(StoreError::backend)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut batch = self.database.batch();
        for (key, value) in ops {
            match value {
                Some(value) => {
                    batch.insert(&self.metadata, key, value);
                }
                None => {
                    batch.remove(&self.metadata, key);
                }
            }
        }
        batch.commit().map_err(StoreError::backend)?;
        self.database.persist(PersistMode::SyncAll).map_err(StoreError::backend)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut keys = Vec::new();
        for item in self.metadata.prefix(prefix) {
            let key = item.key().map_err(StoreError::backend)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn batches_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = FjallDatabase::open(dir.path()).unwrap();
            db.write_batch(vec![
                (b"a/1".to_vec(), Some(b"one".to_vec())),
                (b"a/2".to_vec(), Some(b"two".to_vec())),
                (b"b/1".to_vec(), Some(b"three".to_vec())),
            ])
            .unwrap();
            db.delete(b"a/2").unwrap();
        }

        let db = FjallDatabase::open(dir.path()).unwrap();
        assert_eq!(db.get(b"a/1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(db.get(b"a/2").unwrap(), None);
        assert_eq!(db.keys_with_prefix(b"a/").unwrap(), vec![b"a/1".to_vec()]);
    }

    #[test]
    fn opens_at_configured_path() {
        let dir = tempdir().unwrap();
        let config = Config::builder()
            .set_default("database-path", dir.path().to_str().unwrap())
            .unwrap()
            .build()
            .unwrap();
        let db = FjallDatabase::open_from_config(&config).unwrap();
        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
