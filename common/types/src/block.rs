use serde::{Deserialize, Serialize};
use thiserror::Error;

use crypto::sha256;

use crate::Hash;

pub const GENESIS_BLOCK_DATA: &str = "this is the genesis block!";

/// A single block of the chain. Blocks are immutable once constructed:
/// the factory fills every field before the block is handed to anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    #[serde(with = "hex::serde")]
    pub previous_block_hash: Vec<u8>,
    pub data: String,
    pub difficulty: u64,
    pub nonce: u64,
    #[serde(with = "hex::serde")]
    pub hash: Vec<u8>,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    #[error("block is missing or empty")]
    NilBlock,
    #[error("index is not valid")]
    BadIndex,
    #[error("previous block hash does not match")]
    BadPrevHash,
    #[error("hash is invalid")]
    BadHash,
    #[error("genesis block is wrong")]
    BadGenesis,
}

impl Block {
    /// Canonical header bytes: index and timestamp as little-endian 64-bit
    /// words, then the previous block hash and the data payload raw. The
    /// last two fields need no length prefix because they are the tail.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(16 + self.previous_block_hash.len() + self.data.len());
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&(self.timestamp as u64).to_le_bytes());
        buf.extend_from_slice(&self.previous_block_hash);
        buf.extend_from_slice(self.data.as_bytes());
        buf
    }

    /// Canonical header bytes extended with the proof-of-work fields.
    pub fn pow_header_bytes(&self, difficulty: u64, nonce: u64) -> Vec<u8> {
        let mut buf = self.header_bytes();
        buf.extend_from_slice(&difficulty.to_le_bytes());
        buf.extend_from_slice(&nonce.to_le_bytes());
        buf
    }

    pub fn compute_hash(&self) -> Hash {
        sha256(&self.header_bytes())
    }

    pub fn compute_pow_hash(&self) -> Hash {
        sha256(&self.pow_header_bytes(self.difficulty, self.nonce))
    }
}

/// The genesis block every node starts from. Its hash is always computed
/// over the base header so the constant is identical across consensus
/// modes and across nodes.
pub fn genesis_block() -> Block {
    let mut genesis = Block {
        index: 0,
        // A zero timestamp keeps the hash reproducible when we receive
        // chains from other peers.
        timestamp: 0,
        previous_block_hash: Vec::new(),
        data: GENESIS_BLOCK_DATA.to_string(),
        difficulty: 0,
        nonce: 0,
        hash: Vec::new(),
    };
    genesis.hash = genesis.compute_hash().to_vec();
    genesis
}

/// Checks that `block` is a valid successor of `prev`. With `pow` set the
/// stored hash must match the proof-of-work header recomputation, otherwise
/// the base header one.
pub fn validate_block(block: &Block, prev: &Block, pow: bool) -> Result<(), BlockError> {
    if block.index != prev.index + 1 {
        return Err(BlockError::BadIndex);
    }

    if block.previous_block_hash != prev.hash {
        return Err(BlockError::BadPrevHash);
    }

    let recomputed = if pow {
        block.compute_pow_hash()
    } else {
        block.compute_hash()
    };
    if block.hash != recomputed {
        return Err(BlockError::BadHash);
    }

    Ok(())
}

/// Checks that `block` equals the canonical genesis in all six fields.
pub fn validate_genesis(block: &Block) -> Result<(), BlockError> {
    if *block != genesis_block() {
        return Err(BlockError::BadGenesis);
    }
    Ok(())
}
