use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use blockchain::BlockChain;

pub(crate) const PROBES_PORT: u16 = 8081;

/// Serves the orchestrator probes. Readiness gates on the genesis block
/// existing, which also exercises the chain lock.
pub(crate) async fn serve(
    chain: Arc<BlockChain>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(chain);

    let addr = SocketAddr::from(([0, 0, 0, 0], PROBES_PORT));
    info!(%addr, "serving probes");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(chain): State<Arc<BlockChain>>) -> StatusCode {
    if chain.length() > 0 {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
