mod discovery;
mod environment;
mod servers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use blockchain::BlockFactory;
use consensus::{ConsensusSettings, ProofOfWork};
use p2p::gossip::BlockGossip;
use p2p::manager::{peer_event_channel, PeersManager};

use crate::discovery::PodWatch;
use crate::environment::Environment;
use crate::servers::public::AppState;

const DEFAULT_CONSENSUS_SETTINGS_PATH: &str = "/settings/consensus-settings.yaml";

#[derive(Debug, Parser)]
#[command(name = "naivecoin-node", about = "A naive blockchain peer")]
struct Args {
    /// The path to where the consensus settings are stored.
    #[arg(long = "consensus-settings", default_value = DEFAULT_CONSENSUS_SETTINGS_PATH)]
    consensus_settings: PathBuf,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!("starting");

    let settings = match ConsensusSettings::open(&args.consensus_settings) {
        Ok(settings) => settings,
        Err(err) => {
            error!(
                error = %err,
                path = ?args.consensus_settings,
                "could not load consensus settings correctly"
            );
            return 4;
        }
    };

    let environment = match Environment::from_env() {
        Ok(environment) => environment,
        Err(err) => {
            error!(error = %err, "incomplete environment");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "could not start the runtime");
            return 1;
        }
    };

    runtime.block_on(run_node(environment, settings))
}

async fn run_node(environment: Environment, settings: ConsensusSettings) -> i32 {
    let pow = settings
        .proof_of_work
        .as_ref()
        .map(|settings| Arc::new(ProofOfWork::new(settings)));
    info!(
        consensus = if pow.is_some() { "proof-of-work" } else { "length-rule" },
        "initializing chain"
    );

    let factory = Arc::new(BlockFactory::new(pow));
    let chain = Arc::new(factory.new_chain());
    let gossip = Arc::new(BlockGossip::new());
    let manager = Arc::new(PeersManager::new(chain.clone()));
    let shutdown = CancellationToken::new();

    let (peer_events, peer_events_rx) = peer_event_channel();

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "error while creating the orchestrator client");
            return 2;
        }
    };
    let watch = match PodWatch::new(client, &environment).await {
        Ok(watch) => watch,
        Err(err) => {
            error!(error = %err, "error while wiring the pod watch");
            return 3;
        }
    };

    // The sync coordinator exits once discovery drops its sender, so it
    // is joined separately after everything else has shut down.
    let coordinator = tokio::spawn(
        manager
            .clone()
            .listen(peer_events_rx, shutdown.child_token()),
    );

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
    {
        let shutdown = shutdown.child_token();
        tasks.spawn(async move {
            watch.run(peer_events, shutdown).await;
            Ok(())
        });
    }
    {
        let chain = chain.clone();
        let shutdown = shutdown.child_token();
        tasks.spawn(servers::probes::serve(chain, shutdown));
    }
    {
        let state = AppState::new(
            chain.clone(),
            factory.clone(),
            gossip.clone(),
            shutdown.child_token(),
        );
        tasks.spawn(servers::public::serve(state, shutdown.child_token()));
    }
    {
        let ip = environment.ip.clone();
        let chain = chain.clone();
        let gossip = gossip.clone();
        let shutdown = shutdown.child_token();
        tasks.spawn(async move { rpc::start_peer_server(&ip, chain, gossip, shutdown).await });
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "could not listen for the shutdown signal");
    }
    info!("exit requested, shutting down");
    shutdown.cancel();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "task ended with an error"),
            Err(err) => error!(error = %err, "task panicked"),
        }
    }
    let _ = coordinator.await;

    info!("clean up done, goodbye");
    0
}
