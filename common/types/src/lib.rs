pub mod block;
pub mod events;

pub use block::{Block, BlockError};
pub use events::{PeerEvent, PeerInfo};

pub type Hash = [u8; crypto::HASH_LEN];
