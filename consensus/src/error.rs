use thiserror::Error;

use types::BlockError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("hash does not meet the difficulty target")]
    BadPow,
    #[error("timestamp is not valid")]
    BadTimestamp,
    #[error("nonce space exhausted while mining")]
    MineExhausted,
    #[error("mining was cancelled")]
    MineCancelled,
}
