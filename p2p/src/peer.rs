use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Code;
use tracing::{info, warn};

use blockchain::BlockChain;
use proto::peer::peer_communication_client::PeerCommunicationClient;
use types::{Block, BlockError};

/// Port every node serves its peer RPC on.
pub const PEER_RPC_PORT: u16 = 8082;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc deadline exceeded")]
    Timeout,
    #[error("peer is unavailable: {0}")]
    Unavailable(#[from] tonic::transport::Error),
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// The unary surface of a peer, kept behind a trait so the sync
/// coordinator can be driven by a stub in tests.
#[tonic::async_trait]
pub trait PeerRpc: Send + Sync {
    async fn latest_block(&self) -> Result<Block, RpcError>;
    async fn full_block_chain(&self) -> Result<Vec<Block>, RpcError>;
}

/// A remote node. The cancellation token is a child of the coordinator's
/// and is fired when the orchestrator reports the peer dead.
#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub ip: String,
    cancel: CancellationToken,
}

impl Peer {
    pub fn new(name: String, ip: String, cancel: CancellationToken) -> Self {
        Self { name, ip, cancel }
    }

    pub fn cancel_subscription(&self) {
        self.cancel.cancel();
    }

    /// Dials the peer. `connect` resolves only once the underlying
    /// connection is established, so callers never race a half-open dial.
    async fn connect(&self) -> Result<PeerCommunicationClient<Channel>, RpcError> {
        let client =
            PeerCommunicationClient::connect(format!("http://{}:{}", self.ip, PEER_RPC_PORT))
                .await?;
        Ok(client)
    }

    /// Consumes the peer's block stream and appends every received block
    /// to the chain. Push failures are logged and do not end the stream;
    /// it runs until the peer closes it, an unrecoverable status arrives
    /// or the peer's cancellation token fires.
    pub async fn subscribe_new_blocks(&self, chain: Arc<BlockChain>) -> Result<(), RpcError> {
        let mut client = self.connect().await?;
        let mut stream = client
            .subscribe_new_blocks(proto::Empty {})
            .await?
            .into_inner();

        info!(
            peer = %self.name,
            ip = %self.ip,
            "listening for block generation events from peer"
        );

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                message = stream.message() => message,
            };

            match message {
                Ok(Some(wire_block)) => {
                    let block = match Block::try_from(wire_block) {
                        Ok(block) => block,
                        Err(err) => {
                            warn!(peer = %self.name, error = %err, "ignoring malformed block from peer");
                            continue;
                        }
                    };

                    info!(peer = %self.name, index = block.index, data = %block.data, "got block from peer");
                    match chain.push(&block) {
                        Ok(()) => info!(peer = %self.name, "added block generated by peer"),
                        Err(err) => {
                            warn!(peer = %self.name, error = %err, "error while adding block to blockchain")
                        }
                    }
                }
                Ok(None) => return Ok(()),
                Err(status) => {
                    return match status.code() {
                        Code::Cancelled | Code::DeadlineExceeded => Ok(()),
                        _ => Err(status.into()),
                    }
                }
            }
        }
    }
}

#[tonic::async_trait]
impl PeerRpc for Peer {
    async fn latest_block(&self) -> Result<Block, RpcError> {
        let mut client = self.connect().await?;
        let block = client.get_latest_block(proto::Empty {}).await?.into_inner();
        Ok(Block::try_from(block)?)
    }

    async fn full_block_chain(&self) -> Result<Vec<Block>, RpcError> {
        let mut client = self.connect().await?;
        let chain = client
            .get_full_block_chain(proto::Empty {})
            .await?
            .into_inner();
        chain
            .blocks
            .into_iter()
            .map(|block| Block::try_from(block).map_err(RpcError::from))
            .collect()
    }
}
