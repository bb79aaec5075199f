use types::BlockError;

use crate::types::Block;

impl From<types::Block> for Block {
    fn from(block: types::Block) -> Self {
        Block {
            index: block.index,
            timestamp: block.timestamp,
            previous_block_hash: block.previous_block_hash,
            data: block.data,
            difficulty: block.difficulty,
            nonce: block.nonce,
            hash: block.hash,
        }
    }
}

impl TryFrom<Block> for types::Block {
    type Error = BlockError;

    /// A wire block with no hash at all is a default-constructed message,
    /// which peers must never send.
    fn try_from(block: Block) -> Result<Self, Self::Error> {
        if block.hash.is_empty() {
            return Err(BlockError::NilBlock);
        }
        if block.hash.len() != crypto::HASH_LEN {
            return Err(BlockError::BadHash);
        }
        Ok(types::Block {
            index: block.index,
            timestamp: block.timestamp,
            previous_block_hash: block.previous_block_hash,
            data: block.data,
            difficulty: block.difficulty,
            nonce: block.nonce,
            hash: block.hash,
        })
    }
}
