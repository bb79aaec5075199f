use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use consensus::ProofOfWork;
use types::Block;

use crate::chain::BlockChain;

/// Creates blocks and blockchains according to the configured consensus.
/// The same engine instance is shared with every chain the factory
/// produces, so difficulty adjustments apply to subsequent mining.
pub struct BlockFactory {
    pow: Option<Arc<ProofOfWork>>,
}

impl BlockFactory {
    pub fn new(pow: Option<Arc<ProofOfWork>>) -> Self {
        Self { pow }
    }

    /// Drafts a block on top of `prev` and finalizes it: mined under
    /// proof-of-work, plainly hashed otherwise. Mining is CPU-bound and
    /// checks `cancel` periodically, so callers should run this on a
    /// blocking worker.
    pub fn new_block(
        &self,
        data: String,
        prev: &Block,
        cancel: &CancellationToken,
    ) -> Result<Block, consensus::Error> {
        let mut draft = Block {
            index: prev.index + 1,
            timestamp: Utc::now().timestamp(),
            previous_block_hash: prev.hash.clone(),
            data,
            difficulty: 0,
            nonce: 0,
            hash: Vec::new(),
        };

        match &self.pow {
            Some(pow) => pow.mine(&draft, cancel),
            None => {
                draft.hash = draft.compute_hash().to_vec();
                Ok(draft)
            }
        }
    }

    pub fn new_chain(&self) -> BlockChain {
        BlockChain::new(self.pow.clone())
    }
}

#[cfg(test)]
mod tests {
    use consensus::ProofOfWorkSettings;

    use super::*;

    #[test]
    fn plain_blocks_carry_the_base_hash() {
        let factory = BlockFactory::new(None);
        let chain = factory.new_chain();

        let block = factory
            .new_block("payload".to_string(), &chain.last(), &CancellationToken::new())
            .unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.difficulty, 0);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, block.compute_hash().to_vec());
    }

    #[test]
    fn mined_blocks_pass_chain_validation() {
        let settings = ProofOfWorkSettings {
            initial_difficulty: Some(1),
            ..Default::default()
        };
        let pow = Arc::new(ProofOfWork::new(&settings));
        let factory = BlockFactory::new(Some(pow));
        let chain = factory.new_chain();

        let block = factory
            .new_block("mined".to_string(), &chain.last(), &CancellationToken::new())
            .unwrap();
        chain.push(&block).unwrap();
        assert_eq!(chain.length(), 2);
    }
}
