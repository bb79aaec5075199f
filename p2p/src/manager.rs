use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use blockchain::BlockChain;
use types::{PeerEvent, PeerInfo};

use crate::peer::{Peer, PeerRpc, RpcError};

/// Capacity of the peer-event channel. Senders block when it is full;
/// membership events must never be dropped.
pub const PEER_EVENT_CAPACITY: usize = 100;

/// Deadline for the synchronization calls made while adding a peer. The
/// block subscription itself is long-lived and has none.
const SYNC_RPC_DEADLINE: Duration = Duration::from_secs(30);

pub fn peer_event_channel() -> (mpsc::Sender<PeerEvent>, mpsc::Receiver<PeerEvent>) {
    mpsc::channel(PEER_EVENT_CAPACITY)
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer is already present")]
    AlreadyKnown,
    #[error("peer's chain diverges from ours at the tip")]
    DivergedTip,
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Chain(#[from] blockchain::Error),
}

/// The single consumer of orchestrator peer events: decides whether to
/// adopt a new peer's chain, owns the registry of live peers and the
/// lifecycle of their block subscriptions.
pub struct PeersManager {
    chain: Arc<BlockChain>,
    peers: DashMap<String, Peer>,
}

impl PeersManager {
    pub fn new(chain: Arc<BlockChain>) -> Self {
        Self {
            chain,
            peers: DashMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Consumes peer events until the channel closes, spawning one task
    /// per event so a slow synchronization never backs up the
    /// orchestrator watch. On close every subscription is cancelled and
    /// joined before returning.
    pub async fn listen(
        self: Arc<Self>,
        mut events: mpsc::Receiver<PeerEvent>,
        shutdown: CancellationToken,
    ) {
        let mut tasks = JoinSet::new();

        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::NewPeer(info) => {
                    let manager = self.clone();
                    let cancel = shutdown.child_token();
                    tasks.spawn(async move {
                        manager.handle_new_peer(info, cancel).await;
                    });
                }
                PeerEvent::DeadPeer(info) => match self.remove_peer(&info.name) {
                    Some(peer) => {
                        info!(peer = %peer.name, "removed peer");
                        peer.cancel_subscription();
                    }
                    None => warn!(peer = %info.name, "peer was not found"),
                },
            }
        }

        info!("peer events channel closed, unsubscribing from all peers");
        shutdown.cancel();
        while tasks.join_next().await.is_some() {}
        info!("all peer subscriptions stopped");
    }

    async fn handle_new_peer(&self, info: PeerInfo, cancel: CancellationToken) {
        let peer = Peer::new(info.name, info.ip, cancel);

        if let Err(err) = self.add_peer(&peer).await {
            warn!(peer = %peer.name, error = %err, "could not add peer");
            return;
        }

        if let Err(err) = peer.subscribe_new_blocks(self.chain.clone()).await {
            warn!(peer = %peer.name, error = %err, "peer subscription ended with an error");
        }
    }

    /// Synchronizes against the peer and inserts it into the registry.
    /// Any RPC failure abandons the event without inserting anything; a
    /// later orchestrator event retries from scratch.
    pub async fn add_peer(&self, peer: &Peer) -> Result<(), SyncError> {
        if self.peers.contains_key(&peer.name) {
            return Err(SyncError::AlreadyKnown);
        }

        self.sync_with(peer).await?;

        match self.peers.entry(peer.name.clone()) {
            Entry::Occupied(_) => return Err(SyncError::AlreadyKnown),
            Entry::Vacant(entry) => {
                entry.insert(peer.clone());
            }
        }

        info!(peer = %peer.name, "added peer");
        Ok(())
    }

    /// Compares tips with the peer and pulls its full chain when it is
    /// ahead. A tip that disagrees at the same height is a divergence we
    /// do not reconcile here.
    pub async fn sync_with(&self, rpc: &dyn PeerRpc) -> Result<(), SyncError> {
        let peer_tip = timeout(SYNC_RPC_DEADLINE, rpc.latest_block())
            .await
            .map_err(|_| RpcError::Timeout)??;
        let local_tip = self.chain.last();

        match peer_tip.index.cmp(&local_tip.index) {
            Ordering::Equal => {
                if peer_tip.hash != local_tip.hash
                    || peer_tip.previous_block_hash != local_tip.previous_block_hash
                {
                    return Err(SyncError::DivergedTip);
                }
            }
            Ordering::Greater => {
                let peer_chain = timeout(SYNC_RPC_DEADLINE, rpc.full_block_chain())
                    .await
                    .map_err(|_| RpcError::Timeout)??;
                let outcome = self.chain.replace_with(peer_chain)?;
                info!(?outcome, "synchronized against peer chain");
            }
            Ordering::Less => {
                // The peer is behind; it will resync from us through its
                // own coordinator.
            }
        }

        Ok(())
    }

    pub fn remove_peer(&self, name: &str) -> Option<Peer> {
        self.peers.remove(name).map(|(_, peer)| peer)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use consensus::{ProofOfWork, ProofOfWorkSettings};
    use types::block::genesis_block;
    use types::Block;

    use super::*;

    struct StubPeer {
        chain: Vec<Block>,
    }

    #[tonic::async_trait]
    impl PeerRpc for StubPeer {
        async fn latest_block(&self) -> Result<Block, RpcError> {
            Ok(self.chain.last().unwrap().clone())
        }

        async fn full_block_chain(&self) -> Result<Vec<Block>, RpcError> {
            Ok(self.chain.clone())
        }
    }

    fn pow() -> Arc<ProofOfWork> {
        Arc::new(ProofOfWork::new(&ProofOfWorkSettings {
            initial_difficulty: Some(1),
            block_generation_interval: Some(100),
            difficulty_adjustment_interval: Some(100),
            enforce_timestamp_lower_bound: false,
        }))
    }

    fn mined_chain(length: u64) -> Vec<Block> {
        let engine = pow();
        let mut chain = vec![genesis_block()];
        for i in 1..=length {
            let prev = chain.last().unwrap();
            let draft = Block {
                index: prev.index + 1,
                timestamp: i as i64,
                previous_block_hash: prev.hash.clone(),
                data: format!("block {i}"),
                difficulty: 0,
                nonce: 0,
                hash: Vec::new(),
            };
            chain.push(engine.mine(&draft, &CancellationToken::new()).unwrap());
        }
        chain
    }

    #[tokio::test]
    async fn a_peer_that_is_ahead_drives_a_full_resync() {
        let peer_chain = mined_chain(5);
        let stub = StubPeer {
            chain: peer_chain.clone(),
        };

        let local = Arc::new(BlockChain::new(Some(pow())));
        let manager = PeersManager::new(local.clone());

        manager.sync_with(&stub).await.unwrap();

        assert_eq!(local.length(), 6);
        assert_eq!(local.last().hash, peer_chain.last().unwrap().hash);
    }

    #[tokio::test]
    async fn an_equal_tip_with_a_different_hash_is_abandoned() {
        let local = Arc::new(BlockChain::new(Some(pow())));
        let manager = PeersManager::new(local.clone());

        let mut foreign_tip = genesis_block();
        foreign_tip.data = "some other genesis".to_string();
        foreign_tip.hash = foreign_tip.compute_hash().to_vec();
        let stub = StubPeer {
            chain: vec![foreign_tip],
        };

        assert!(matches!(
            manager.sync_with(&stub).await,
            Err(SyncError::DivergedTip)
        ));
        assert_eq!(local.length(), 1);
    }

    #[tokio::test]
    async fn a_peer_that_is_behind_needs_no_action() {
        let local = Arc::new(BlockChain::new(Some(pow())));
        for block in mined_chain(3).into_iter().skip(1) {
            local.push(&block).unwrap();
        }
        let manager = PeersManager::new(local.clone());

        let stub = StubPeer {
            chain: vec![genesis_block()],
        };
        manager.sync_with(&stub).await.unwrap();
        assert_eq!(local.length(), 4);
    }

    #[tokio::test]
    async fn dead_peer_events_fire_the_cancellation_token() {
        let local = Arc::new(BlockChain::new(None));
        let manager = Arc::new(PeersManager::new(local));

        let cancel = CancellationToken::new();
        let peer = Peer::new("peer-1".to_string(), "10.0.0.1".to_string(), cancel.clone());
        manager.peers.insert(peer.name.clone(), peer);
        assert!(manager.contains("peer-1"));

        let removed = manager.remove_peer("peer-1").unwrap();
        removed.cancel_subscription();
        assert!(cancel.is_cancelled());
        assert!(!manager.contains("peer-1"));
    }
}
