pub mod chain;
pub mod error;
pub mod factory;

pub use chain::{BlockChain, ReplaceOutcome};
pub use error::Error;
pub use factory::BlockFactory;
