use super::{corrupt, keyed, State, BLOCK_PREFIX};
use slotgate_codec::StatelessBlock;
use slotgate_common::{BlockId, BlockStatus, StoreError};

#[derive(minicbor::Encode, minicbor::Decode)]
struct BlockRecord {
    #[cbor(n(0), with = "minicbor::bytes")]
    bytes: Vec<u8>,
    #[n(1)]
    status: BlockStatus,
}

impl State {
    pub fn get_block(
        &self,
        id: &BlockId,
    ) -> Result<Option<(StatelessBlock, BlockStatus)>, StoreError> {
        let key = keyed(BLOCK_PREFIX, id.as_ref());
        let Some(value) = self.db.get(&key)? else {
            return Ok(None);
        };
        let record: BlockRecord = minicbor::decode(&value).map_err(|e| corrupt(&key, e))?;
        let block = slotgate_codec::parse(&record.bytes).map_err(|e| corrupt(&key, e))?;
        Ok(Some((block, record.status)))
    }

    pub fn put_block(&self, block: &StatelessBlock, status: BlockStatus) -> Result<(), StoreError> {
        let record = BlockRecord {
            bytes: block.bytes().to_vec(),
            status,
        };
        let value = minicbor::to_vec(&record).map_err(StoreError::backend)?;
        self.db.put(&keyed(BLOCK_PREFIX, block.id().as_ref()), &value)
    }
}
