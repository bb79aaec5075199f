use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use blockchain::{BlockChain, BlockFactory};
use p2p::gossip::BlockGossip;
use types::Block;

pub(crate) const PUBLIC_PORT: u16 = 8080;

#[derive(Clone)]
pub(crate) struct AppState {
    chain: Arc<BlockChain>,
    factory: Arc<BlockFactory>,
    gossip: Arc<BlockGossip>,
    mint_cancel: CancellationToken,
}

impl AppState {
    pub fn new(
        chain: Arc<BlockChain>,
        factory: Arc<BlockFactory>,
        gossip: Arc<BlockGossip>,
        mint_cancel: CancellationToken,
    ) -> AppState {
        AppState {
            chain,
            factory,
            gossip,
            mint_cancel,
        }
    }
}

/// Serves the user-facing API: reading the chain and submitting data for
/// a new block.
pub(crate) async fn serve(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/blocks", get(get_blocks).post(post_blocks))
        .route("/blocks/last", get(get_last_block))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], PUBLIC_PORT));
    info!(%addr, "serving public api");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn get_blocks(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.chain.snapshot())
}

async fn get_last_block(State(state): State<AppState>) -> Json<Block> {
    Json(state.chain.last())
}

/// Mines the submitted payload on the current tip, appends the result and
/// fans it out to subscribed peers.
async fn post_blocks(State(state): State<AppState>, body: String) -> (StatusCode, String) {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "body cannot be empty".to_string());
    }

    let prev = state.chain.last();
    let factory = state.factory.clone();
    let cancel = state.mint_cancel.child_token();
    let mined = tokio::task::spawn_blocking(move || factory.new_block(body, &prev, &cancel)).await;

    let block = match mined {
        Ok(Ok(block)) => block,
        Ok(Err(consensus::Error::MineCancelled)) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "shutting down".to_string());
        }
        Ok(Err(err)) => return (StatusCode::BAD_REQUEST, err.to_string()),
        Err(err) => {
            error!(error = %err, "mining task failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
        }
    };

    if let Err(err) = state.chain.push(&block) {
        return (StatusCode::BAD_REQUEST, err.to_string());
    }
    state.gossip.broadcast(&block);

    (StatusCode::OK, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let factory = Arc::new(BlockFactory::new(None));
        let chain = Arc::new(factory.new_chain());
        AppState::new(
            chain,
            factory,
            Arc::new(BlockGossip::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn empty_submissions_are_rejected() {
        let state = state();
        let (status, message) = post_blocks(State(state), String::new()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "body cannot be empty");
    }

    #[tokio::test]
    async fn submissions_are_mined_pushed_and_broadcast() {
        let state = state();
        let mut subscription = state.gossip.subscribe();

        let (status, _) = post_blocks(State(state.clone()), "hello".to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.chain.length(), 2);

        let gossiped = subscription.receiver.recv().await.unwrap();
        assert_eq!(gossiped.data, "hello");
        assert_eq!(gossiped.hash, state.chain.last().hash);
    }

    #[tokio::test]
    async fn the_chain_is_served_as_json() {
        let state = state();
        let Json(blocks) = get_blocks(State(state.clone())).await;
        assert_eq!(blocks.len(), 1);

        let Json(last) = get_last_block(State(state)).await;
        assert_eq!(last.index, 0);
        assert!(serde_json::to_string(&last).unwrap().contains("\"hash\""));
    }
}
