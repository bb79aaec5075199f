use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use primitive_types::U256;
use tracing::{info, warn};

use consensus::{difficulty_weight, ProofOfWork};
use types::block::{genesis_block, validate_block, validate_genesis};
use types::Block;

use crate::error::Error;

/// What became of a [`BlockChain::replace_with`] call. None of these are
/// errors: a weaker or equal candidate simply leaves the chain alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    SameCumulativeDifficulty,
    LowerCumulativeDifficulty,
    SameLength,
    Shorter,
}

struct ChainInner {
    blocks: Vec<Block>,
    cumulative_difficulty: U256,
}

/// The node's ordered, in-memory sequence of blocks. Every public
/// operation takes the single mutex for its whole duration and releases
/// it before returning; nothing here calls out while holding it.
pub struct BlockChain {
    inner: Mutex<ChainInner>,
    pow: Option<Arc<ProofOfWork>>,
}

impl BlockChain {
    /// Creates a chain containing only the genesis block. The chain is
    /// never empty from this point on.
    pub fn new(pow: Option<Arc<ProofOfWork>>) -> Self {
        Self {
            inner: Mutex::new(ChainInner {
                blocks: vec![genesis_block()],
                cumulative_difficulty: U256::zero(),
            }),
            pow,
        }
    }

    pub fn length(&self) -> u64 {
        self.inner.lock().unwrap().blocks.len() as u64
    }

    pub fn last(&self) -> Block {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks
            .last()
            .cloned()
            .expect("chain contains at least the genesis block; qed")
    }

    pub fn snapshot(&self) -> Vec<Block> {
        self.inner.lock().unwrap().blocks.clone()
    }

    pub fn cumulative_difficulty(&self) -> U256 {
        self.inner.lock().unwrap().cumulative_difficulty
    }

    /// Validates `block` against the current tail and appends it. The
    /// operation is atomic: on any validation failure the chain and its
    /// cumulative difficulty are untouched.
    pub fn push(&self, block: &Block) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();

        // The tail is read and the block appended under the same lock so
        // a concurrent push cannot slip a block in between.
        let last = inner
            .blocks
            .last()
            .expect("chain contains at least the genesis block; qed");

        validate_block(block, last, self.pow.is_some())?;
        if let Some(pow) = &self.pow {
            pow.validate_block_hash(block)?;
            pow.validate_block_timestamps(block, last)?;
        }

        inner.blocks.push(block.clone());

        if let Some(pow) = &self.pow {
            inner.cumulative_difficulty =
                inner.cumulative_difficulty + difficulty_weight(block.difficulty);

            if pow.block_generation_interval() > 0
                && block.index % pow.block_generation_interval() == 0
            {
                pow.adjust_difficulty(&inner.blocks);
            }
        }

        Ok(())
    }

    /// Validates `new_chain` in full and adopts it when it beats the
    /// current one: by cumulative difficulty under proof-of-work, by
    /// strict length otherwise.
    pub fn replace_with(&self, new_chain: Vec<Block>) -> Result<ReplaceOutcome, Error> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(pow) = &self.pow {
            let new_cumulative_difficulty = pow.validate_chain(&new_chain)?;

            return Ok(
                match new_cumulative_difficulty.cmp(&inner.cumulative_difficulty) {
                    Ordering::Greater => {
                        inner.blocks = new_chain;
                        inner.cumulative_difficulty = new_cumulative_difficulty;
                        let tip = inner
                            .blocks
                            .last()
                            .expect("validated chain starts at genesis; qed");
                        pow.set_difficulty(tip.difficulty);
                        info!(
                            length = inner.blocks.len(),
                            "chain replaced with the peer's chain"
                        );
                        ReplaceOutcome::Replaced
                    }
                    Ordering::Equal => {
                        info!("peer chain is valid and carries the same cumulative difficulty, stopping here");
                        ReplaceOutcome::SameCumulativeDifficulty
                    }
                    Ordering::Less => {
                        warn!("peer chain carries less cumulative difficulty than ours, stopping here");
                        ReplaceOutcome::LowerCumulativeDifficulty
                    }
                },
            );
        }

        // Without proof-of-work the decision is by length. Validation can
        // take a while, so the cheap length check runs first.
        if new_chain.len() < inner.blocks.len() {
            return Ok(ReplaceOutcome::Shorter);
        }

        let genesis = new_chain.first().ok_or(types::BlockError::NilBlock)?;
        validate_genesis(genesis)?;
        for window in new_chain.windows(2) {
            validate_block(&window[1], &window[0], false)?;
        }

        if new_chain.len() == inner.blocks.len() {
            info!("peer chain is valid and the same length as ours, stopping here");
            return Ok(ReplaceOutcome::SameLength);
        }

        inner.blocks = new_chain;
        info!(
            length = inner.blocks.len(),
            "chain replaced with the peer's chain"
        );
        Ok(ReplaceOutcome::Replaced)
    }
}
