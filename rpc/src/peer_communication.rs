use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::debug;

use blockchain::BlockChain;
use p2p::gossip::{BlockGossip, SUBSCRIBER_CHANNEL_CAPACITY};
use proto::peer::peer_communication_server::PeerCommunication;
use proto::Empty;

/// Answers the peer-facing RPCs from the chain store and mirrors gossip
/// subscriptions onto outbound streams.
pub(crate) struct PeerCommunicationService {
    chain: Arc<BlockChain>,
    gossip: Arc<BlockGossip>,
}

impl PeerCommunicationService {
    pub(crate) fn new(chain: Arc<BlockChain>, gossip: Arc<BlockGossip>) -> Self {
        Self { chain, gossip }
    }
}

#[tonic::async_trait]
impl PeerCommunication for PeerCommunicationService {
    async fn get_latest_block(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<proto::Block>, Status> {
        Ok(Response::new(self.chain.last().into()))
    }

    async fn get_full_block_chain(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<proto::BlockChain>, Status> {
        let blocks = self
            .chain
            .snapshot()
            .into_iter()
            .map(proto::Block::from)
            .collect();
        Ok(Response::new(proto::BlockChain { blocks }))
    }

    type SubscribeNewBlocksStream =
        Pin<Box<dyn Stream<Item = Result<proto::Block, Status>> + Send + 'static>>;

    /// Subscribes the caller to locally minted blocks. The forwarding
    /// task runs until the gossip channel closes or the client goes away,
    /// and removes the subscription on exit either way.
    async fn subscribe_new_blocks(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<Self::SubscribeNewBlocksStream>, Status> {
        let subscription = self.gossip.subscribe();
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);

        let gossip = self.gossip.clone();
        tokio::spawn(async move {
            let id = subscription.id;
            let mut blocks = subscription.receiver;

            loop {
                tokio::select! {
                    _ = sender.closed() => break,
                    block = blocks.recv() => match block {
                        Some(block) => {
                            if sender.send(Ok(proto::Block::from(block))).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }

            gossip.unsubscribe(id);
            debug!(subscriber = id, "peer block stream closed");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(receiver))))
    }
}
