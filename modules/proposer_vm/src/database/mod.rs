//! Key-value databases backing the proposer VM metadata
use slotgate_common::StoreError;

mod fjall_db;
mod memory;
mod prefixed;
mod versioned;

pub use fjall_db::FjallDatabase;
pub use memory::MemDatabase;
pub use prefixed::PrefixDb;
pub use versioned::VersionDb;

/// One write of a batch; `None` deletes the key
pub type BatchOp = (Vec<u8>, Option<Vec<u8>>);

pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply every operation or none of them
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Every key starting with `prefix`, in ascending order
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.write_batch(vec![(key.to_vec(), Some(value.to_vec()))])
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.write_batch(vec![(key.to_vec(), None)])
    }
}
