pub mod gossip;
pub mod manager;
pub mod peer;

pub use gossip::{BlockGossip, BlockSubscription};
pub use manager::{peer_event_channel, PeersManager, SyncError};
pub use peer::{Peer, PeerRpc, RpcError, PEER_RPC_PORT};
