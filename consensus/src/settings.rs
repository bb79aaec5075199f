use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INITIAL_DIFFICULTY: u64 = 3;
pub const DEFAULT_BLOCK_GENERATION_INTERVAL: u64 = 10;
pub const DEFAULT_DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Top-level consensus settings file. Leaving `proofOfWork` out entirely
/// runs the node in length-rule mode without mining targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusSettings {
    #[serde(default)]
    pub proof_of_work: Option<ProofOfWorkSettings>,
}

/// Proof-of-work tuning knobs. Negative or absent values mean "not set"
/// and fall back to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProofOfWorkSettings {
    /// Difficulty the node starts mining at.
    pub initial_difficulty: Option<i64>,
    /// How many seconds a block is expected to take.
    pub block_generation_interval: Option<i64>,
    /// How many blocks between difficulty readjustments.
    pub difficulty_adjustment_interval: Option<i64>,
    /// Also reject blocks whose timestamp sits more than a minute before
    /// the previous block's.
    pub enforce_timestamp_lower_bound: bool,
}

impl ProofOfWorkSettings {
    pub fn initial_difficulty(&self) -> u64 {
        resolve(self.initial_difficulty, DEFAULT_INITIAL_DIFFICULTY)
    }

    pub fn block_generation_interval(&self) -> u64 {
        resolve(self.block_generation_interval, DEFAULT_BLOCK_GENERATION_INTERVAL)
    }

    pub fn difficulty_adjustment_interval(&self) -> u64 {
        resolve(
            self.difficulty_adjustment_interval,
            DEFAULT_DIFFICULTY_ADJUSTMENT_INTERVAL,
        )
    }
}

fn resolve(value: Option<i64>, default: u64) -> u64 {
    match value {
        Some(value) if value >= 0 => value as u64,
        _ => default,
    }
}

impl ConsensusSettings {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ConsensusSettings> {
        let file = OpenOptions::new().read(true).open(path)?;
        let reader = BufReader::new(&file);
        Ok(serde_yaml::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_negative_values_fall_back_to_defaults() {
        let settings: ConsensusSettings = serde_yaml::from_str(
            "proofOfWork:\n  initialDifficulty: -1\n",
        )
        .unwrap();
        let pow = settings.proof_of_work.unwrap();
        assert_eq!(pow.initial_difficulty(), DEFAULT_INITIAL_DIFFICULTY);
        assert_eq!(
            pow.block_generation_interval(),
            DEFAULT_BLOCK_GENERATION_INTERVAL
        );
        assert!(!pow.enforce_timestamp_lower_bound);
    }

    #[test]
    fn explicit_values_are_used() {
        let settings: ConsensusSettings = serde_yaml::from_str(
            "proofOfWork:\n  initialDifficulty: 0\n  blockGenerationInterval: 2\n  difficultyAdjustmentInterval: 4\n  enforceTimestampLowerBound: true\n",
        )
        .unwrap();
        let pow = settings.proof_of_work.unwrap();
        assert_eq!(pow.initial_difficulty(), 0);
        assert_eq!(pow.block_generation_interval(), 2);
        assert_eq!(pow.difficulty_adjustment_interval(), 4);
        assert!(pow.enforce_timestamp_lower_bound);
    }

    #[test]
    fn missing_proof_of_work_section_disables_it() {
        let settings: ConsensusSettings = serde_yaml::from_str("{}").unwrap();
        assert!(settings.proof_of_work.is_none());
    }
}
