use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use primitive_types::U256;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crypto::sha256;
use types::block::{validate_block, validate_genesis};
use types::Block;

use crate::error::Error;
use crate::settings::ProofOfWorkSettings;

/// How many nonces the mining loop tries between cancellation checks.
const MINE_CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

/// How far into the future a block timestamp may sit, in seconds.
const MAX_TIMESTAMP_DRIFT: i64 = 60;

/// The proof-of-work consensus engine. The current difficulty lives here
/// and is only mutated while the chain store holds its lock; the miner
/// reads it through the atomic.
pub struct ProofOfWork {
    difficulty: AtomicU64,
    block_generation_interval: u64,
    difficulty_adjustment_interval: u64,
    enforce_timestamp_lower_bound: bool,
}

impl ProofOfWork {
    pub fn new(settings: &ProofOfWorkSettings) -> Self {
        Self {
            difficulty: AtomicU64::new(settings.initial_difficulty()),
            block_generation_interval: settings.block_generation_interval(),
            difficulty_adjustment_interval: settings.difficulty_adjustment_interval(),
            enforce_timestamp_lower_bound: settings.enforce_timestamp_lower_bound,
        }
    }

    pub fn current_difficulty(&self) -> u64 {
        self.difficulty.load(Ordering::Acquire)
    }

    pub fn set_difficulty(&self, difficulty: u64) {
        self.difficulty.store(difficulty, Ordering::Release);
    }

    pub fn block_generation_interval(&self) -> u64 {
        self.block_generation_interval
    }

    /// The target a hash must stay strictly below: `1 << (256 - 4 * d)`,
    /// one hexadecimal digit of leading zeroes per difficulty point.
    /// Difficulty 0 would be `1 << 256`, which every hash satisfies.
    pub fn target(difficulty: u64) -> U256 {
        let bits = 256u64.saturating_sub(difficulty.saturating_mul(4));
        if bits >= 256 {
            U256::MAX
        } else if bits == 0 {
            U256::one()
        } else {
            U256::one() << bits
        }
    }

    pub fn meets_target(hash: &[u8; crypto::HASH_LEN], difficulty: u64) -> bool {
        if difficulty == 0 {
            return true;
        }
        U256::from_big_endian(hash) < Self::target(difficulty)
    }

    /// Mines `draft` at the current difficulty: iterates the nonce from
    /// zero until the header hash meets the target. The loop checks the
    /// cancellation token periodically so shutdown stays bounded.
    pub fn mine(&self, draft: &Block, cancel: &CancellationToken) -> Result<Block, Error> {
        let difficulty = self.current_difficulty();
        let mut nonce: u64 = 0;

        loop {
            if nonce % MINE_CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(Error::MineCancelled);
            }

            let hash = sha256(&draft.pow_header_bytes(difficulty, nonce));
            if Self::meets_target(&hash, difficulty) {
                let mut block = draft.clone();
                block.difficulty = difficulty;
                block.nonce = nonce;
                block.hash = hash.to_vec();
                return Ok(block);
            }

            if nonce == i64::MAX as u64 {
                return Err(Error::MineExhausted);
            }
            nonce += 1;
        }
    }

    /// Recomputes the proof-of-work hash from the block's own difficulty
    /// and nonce and checks it against the target for that difficulty.
    pub fn validate_block_hash(&self, block: &Block) -> Result<(), Error> {
        let hash = block.compute_pow_hash();
        if !Self::meets_target(&hash, block.difficulty) {
            return Err(Error::BadPow);
        }
        Ok(())
    }

    pub fn validate_block_timestamps(&self, block: &Block, prev: &Block) -> Result<(), Error> {
        let now = Utc::now().timestamp();
        if block.timestamp > now + MAX_TIMESTAMP_DRIFT {
            return Err(Error::BadTimestamp);
        }
        if self.enforce_timestamp_lower_bound
            && block.timestamp < prev.timestamp - MAX_TIMESTAMP_DRIFT
        {
            return Err(Error::BadTimestamp);
        }
        Ok(())
    }

    /// Validates a whole chain, genesis included, and returns its
    /// cumulative difficulty.
    pub fn validate_chain(&self, chain: &[Block]) -> Result<U256, Error> {
        let genesis = chain.first().ok_or(types::BlockError::NilBlock)?;
        validate_genesis(genesis)?;

        let mut cumulative_difficulty = U256::zero();
        for window in chain.windows(2) {
            let (prev, block) = (&window[0], &window[1]);
            validate_block(block, prev, true)?;
            self.validate_block_hash(block)?;
            self.validate_block_timestamps(block, prev)?;
            cumulative_difficulty = cumulative_difficulty + difficulty_weight(block.difficulty);
        }

        Ok(cumulative_difficulty)
    }

    /// Readjusts the difficulty after every `block_generation_interval`
    /// blocks, comparing the observed span since the previous adjustment
    /// block against `block_generation_interval *
    /// difficulty_adjustment_interval` seconds. The two intervals play
    /// asymmetric roles in the trigger and in the expected-time formula;
    /// that arithmetic is part of the consensus rules and every node must
    /// compute the same adjustment.
    pub fn adjust_difficulty(&self, chain: &[Block]) {
        let interval = self.block_generation_interval as usize;
        if interval == 0 || chain.len() <= interval {
            return;
        }

        let prev_adjustment = &chain[chain.len() - interval];
        let last = &chain[chain.len() - 1];
        let expected = (self.block_generation_interval * self.difficulty_adjustment_interval) as i64;
        let elapsed = last.timestamp - prev_adjustment.timestamp;

        if elapsed < expected / 2 {
            let difficulty = self.difficulty.fetch_add(1, Ordering::AcqRel) + 1;
            info!(difficulty, "blocks are coming in fast, incrementing difficulty");
        } else if elapsed > expected * 2 {
            let _ = self
                .difficulty
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
            info!(
                difficulty = self.current_difficulty(),
                "blocks are coming in slow, decreasing difficulty"
            );
        }
    }
}

/// The weight a block contributes to cumulative difficulty: `2^difficulty`.
pub fn difficulty_weight(difficulty: u64) -> U256 {
    if difficulty >= 256 {
        return U256::MAX;
    }
    U256::one() << difficulty
}

#[cfg(test)]
mod tests {
    use types::block::genesis_block;

    use super::*;

    fn engine(initial_difficulty: i64, block_gen: i64, diff_adj: i64) -> ProofOfWork {
        ProofOfWork::new(&ProofOfWorkSettings {
            initial_difficulty: Some(initial_difficulty),
            block_generation_interval: Some(block_gen),
            difficulty_adjustment_interval: Some(diff_adj),
            enforce_timestamp_lower_bound: false,
        })
    }

    fn draft_on(prev: &Block, timestamp: i64, data: &str) -> Block {
        Block {
            index: prev.index + 1,
            timestamp,
            previous_block_hash: prev.hash.clone(),
            data: data.to_string(),
            difficulty: 0,
            nonce: 0,
            hash: Vec::new(),
        }
    }

    #[test]
    fn target_shrinks_with_difficulty() {
        assert_eq!(ProofOfWork::target(0), U256::MAX);
        assert_eq!(ProofOfWork::target(1), U256::one() << 252);
        assert!(ProofOfWork::target(2) < ProofOfWork::target(1));
        assert_eq!(ProofOfWork::target(64), U256::one());
    }

    #[test]
    fn mining_satisfies_the_target_and_validates() {
        let pow = engine(2, 10, 10);
        let genesis = genesis_block();
        let draft = draft_on(&genesis, 1_650_000_000, "hello");

        let block = pow.mine(&draft, &CancellationToken::new()).unwrap();
        assert_eq!(block.difficulty, 2);
        assert_eq!(block.hash, block.compute_pow_hash().to_vec());
        assert!(ProofOfWork::meets_target(
            &block.compute_pow_hash(),
            block.difficulty
        ));
        assert!(pow.validate_block_hash(&block).is_ok());
    }

    #[test]
    fn mining_is_deterministic() {
        let genesis = genesis_block();
        let draft = draft_on(&genesis, 42, "same draft");

        let a = engine(2, 10, 10).mine(&draft, &CancellationToken::new()).unwrap();
        let b = engine(2, 10, 10).mine(&draft, &CancellationToken::new()).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn mining_observes_cancellation() {
        let pow = engine(10, 10, 10);
        let genesis = genesis_block();
        let draft = draft_on(&genesis, 0, "never mined");

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(pow.mine(&draft, &cancel), Err(Error::MineCancelled));
    }

    #[test]
    fn future_timestamps_are_rejected() {
        let pow = engine(2, 10, 10);
        let genesis = genesis_block();

        let far_future = draft_on(&genesis, Utc::now().timestamp() + 3600, "late");
        assert_eq!(
            pow.validate_block_timestamps(&far_future, &genesis),
            Err(Error::BadTimestamp)
        );

        let fine = draft_on(&genesis, Utc::now().timestamp(), "now");
        assert!(pow.validate_block_timestamps(&fine, &genesis).is_ok());
    }

    #[test]
    fn lower_bound_is_enforced_only_when_enabled() {
        let strict = ProofOfWork::new(&ProofOfWorkSettings {
            enforce_timestamp_lower_bound: true,
            ..Default::default()
        });
        let relaxed = engine(3, 10, 10);

        let mut prev = genesis_block();
        prev.timestamp = 1_000;
        let old = draft_on(&prev, 100, "stale");

        assert_eq!(
            strict.validate_block_timestamps(&old, &prev),
            Err(Error::BadTimestamp)
        );
        assert!(relaxed.validate_block_timestamps(&old, &prev).is_ok());
    }

    #[test]
    fn difficulty_increments_when_blocks_come_fast() {
        let pow = engine(2, 2, 2);
        let genesis = genesis_block();

        let mut chain = vec![genesis];
        for (index, timestamp) in [(1u64, 0i64), (2, 1)] {
            let prev = chain.last().unwrap();
            let mut block = draft_on(prev, timestamp, "fast");
            block.index = index;
            chain.push(pow.mine(&block, &CancellationToken::new()).unwrap());
        }

        // expected span is 2 * 2 = 4s, observed is 1s.
        pow.adjust_difficulty(&chain);
        assert_eq!(pow.current_difficulty(), 3);
    }

    #[test]
    fn difficulty_decrements_when_blocks_come_slow() {
        let pow = engine(2, 2, 2);
        let genesis = genesis_block();

        let mut chain = vec![genesis];
        for (index, timestamp) in [(1u64, 0i64), (2, 100)] {
            let prev = chain.last().unwrap();
            let mut block = draft_on(prev, timestamp, "slow");
            block.index = index;
            chain.push(pow.mine(&block, &CancellationToken::new()).unwrap());
        }

        pow.adjust_difficulty(&chain);
        assert_eq!(pow.current_difficulty(), 1);
    }

    #[test]
    fn difficulty_never_goes_below_zero() {
        let pow = engine(0, 2, 2);
        let genesis = genesis_block();

        let mut chain = vec![genesis];
        for (index, timestamp) in [(1u64, 0i64), (2, 100)] {
            let prev = chain.last().unwrap();
            let mut block = draft_on(prev, timestamp, "slow");
            block.index = index;
            chain.push(pow.mine(&block, &CancellationToken::new()).unwrap());
        }

        pow.adjust_difficulty(&chain);
        assert_eq!(pow.current_difficulty(), 0);
    }

    #[test]
    fn chain_validation_accumulates_difficulty() {
        let pow = engine(1, 10, 10);
        let mut chain = vec![genesis_block()];
        for i in 1..=3u64 {
            let prev = chain.last().unwrap();
            let mut draft = draft_on(prev, i as i64, "b");
            draft.index = i;
            chain.push(pow.mine(&draft, &CancellationToken::new()).unwrap());
        }

        let cumulative = pow.validate_chain(&chain).unwrap();
        assert_eq!(cumulative, U256::from(3) * difficulty_weight(1));
    }

    #[test]
    fn chain_validation_rejects_a_wrong_genesis() {
        let pow = engine(1, 10, 10);
        let mut fake = genesis_block();
        fake.data = "not the genesis".to_string();
        fake.hash = fake.compute_hash().to_vec();

        assert_eq!(
            pow.validate_chain(&[fake]),
            Err(Error::Block(types::BlockError::BadGenesis))
        );
    }
}
