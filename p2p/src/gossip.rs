use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use types::Block;

/// Capacity of each subscriber channel. A subscriber that falls further
/// behind than this starts missing blocks and recovers through the
/// chain-replacement rule instead.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 10;

/// The receiving end of a gossip subscription, handed to the peer RPC
/// server for one outbound stream.
pub struct BlockSubscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<Block>,
}

/// Fans freshly minted blocks out to every subscribed peer stream.
#[derive(Default)]
pub struct BlockGossip {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<Block>)>>,
    next_id: AtomicU64,
}

impl BlockGossip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> BlockSubscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().push((id, sender));
        debug!(subscriber = id, "new gossip subscriber");
        BlockSubscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(subscriber, _)| *subscriber != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Sends a clone of `block` to every subscriber. The subscriber list
    /// is snapshotted under the lock and the sends happen outside it; a
    /// full channel skips that subscriber rather than stalling the caller.
    pub fn broadcast(&self, block: &Block) {
        let subscribers = self.subscribers.lock().unwrap().clone();

        for (id, sender) in subscribers {
            match sender.try_send(block.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = id,
                        index = block.index,
                        "subscriber channel is full, skipping block"
                    );
                }
                Err(TrySendError::Closed(_)) => self.unsubscribe(id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use types::block::genesis_block;

    use super::*;

    fn block_with_index(index: u64) -> Block {
        let mut block = genesis_block();
        block.index = index;
        block
    }

    #[tokio::test]
    async fn every_subscriber_receives_broadcasts() {
        let gossip = BlockGossip::new();
        let mut a = gossip.subscribe();
        let mut b = gossip.subscribe();

        gossip.broadcast(&block_with_index(1));

        assert_eq!(a.receiver.recv().await.unwrap().index, 1);
        assert_eq!(b.receiver.recv().await.unwrap().index, 1);
    }

    #[tokio::test]
    async fn a_full_subscriber_is_skipped_without_blocking() {
        let gossip = BlockGossip::new();
        let mut slow = gossip.subscribe();
        let mut fast = gossip.subscribe();

        // Fill the slow subscriber to capacity without draining it.
        for i in 0..SUBSCRIBER_CHANNEL_CAPACITY as u64 {
            gossip.broadcast(&block_with_index(i));
            assert_eq!(fast.receiver.recv().await.unwrap().index, i);
        }

        // Five more broadcasts: the fast subscriber sees all of them, the
        // slow one only ever held the first batch.
        for i in 0..5u64 {
            gossip.broadcast(&block_with_index(100 + i));
            assert_eq!(fast.receiver.recv().await.unwrap().index, 100 + i);
        }

        for i in 0..SUBSCRIBER_CHANNEL_CAPACITY as u64 {
            assert_eq!(slow.receiver.recv().await.unwrap().index, i);
        }
        assert!(slow.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_on_broadcast() {
        let gossip = BlockGossip::new();
        let subscription = gossip.subscribe();
        assert_eq!(gossip.subscriber_count(), 1);

        drop(subscription);
        gossip.broadcast(&block_with_index(1));
        assert_eq!(gossip.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_channel() {
        let gossip = BlockGossip::new();
        let subscription = gossip.subscribe();
        gossip.unsubscribe(subscription.id);
        assert_eq!(gossip.subscriber_count(), 0);
    }
}
