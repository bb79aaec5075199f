use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Block(#[from] types::BlockError),
    #[error(transparent)]
    Consensus(#[from] consensus::Error),
}
