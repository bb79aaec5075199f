mod peer_communication;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use blockchain::BlockChain;
use p2p::gossip::BlockGossip;
use p2p::PEER_RPC_PORT;
use proto::peer::peer_communication_server::PeerCommunicationServer;

use crate::peer_communication::PeerCommunicationService;

/// Serves the peer RPC surface until `shutdown` fires.
pub async fn start_peer_server(
    ip: &str,
    chain: Arc<BlockChain>,
    gossip: Arc<BlockGossip>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = SocketAddr::new(ip.parse()?, PEER_RPC_PORT);
    let service = PeerCommunicationService::new(chain, gossip);

    info!(addr = ?addr, "serving peer communications");
    Server::builder()
        .add_service(PeerCommunicationServer::new(service))
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
