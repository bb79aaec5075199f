use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::watcher;
use kube::{Api, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use types::{PeerEvent, PeerInfo};

use crate::environment::Environment;

/// Label every chain pod carries; the watch is scoped to it server-side.
pub(crate) const PEER_APP_LABEL: &str = "app=naivecoin";

/// Watches the pods of this deployment and turns their lifecycle into
/// peer events. Stateless pods never change name or address: a replaced
/// pod shows up as a deletion followed by a fresh name.
pub(crate) struct PodWatch {
    pods: Api<Pod>,
    myself: String,
}

impl PodWatch {
    pub async fn new(client: Client, environment: &Environment) -> anyhow::Result<PodWatch> {
        let pods: Api<Pod> = Api::namespaced(client, &environment.namespace);

        // Listing once up front surfaces permission problems at wiring
        // time instead of as an endlessly erroring watch.
        pods.list(&ListParams::default().labels(PEER_APP_LABEL).limit(1))
            .await?;

        Ok(PodWatch {
            pods,
            myself: environment.name.clone(),
        })
    }

    /// Runs until `shutdown` fires or the event channel's receiver goes
    /// away. Sends block when the channel is full; membership events are
    /// never dropped.
    pub async fn run(self, events: mpsc::Sender<PeerEvent>, shutdown: CancellationToken) {
        let config = watcher::Config::default().labels(PEER_APP_LABEL);
        let mut stream = Box::pin(watcher(self.pods.clone(), config));

        info!("watching for peers");
        'watch: loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = stream.try_next() => event,
            };

            match event {
                Ok(Some(watcher::Event::Applied(pod))) => {
                    if !self.forward(&events, pod, false).await {
                        break;
                    }
                }
                Ok(Some(watcher::Event::Deleted(pod))) => {
                    if !self.forward(&events, pod, true).await {
                        break;
                    }
                }
                Ok(Some(watcher::Event::Restarted(pods))) => {
                    for pod in pods {
                        if !self.forward(&events, pod, false).await {
                            break 'watch;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // The watcher re-establishes itself; the gap is
                    // recovered by the next restart listing.
                    warn!(error = %err, "pod watch error");
                }
            }
        }
        info!("stopping peer discovery");
    }

    /// Returns false once the receiving side is gone.
    async fn forward(
        &self,
        events: &mpsc::Sender<PeerEvent>,
        pod: Pod,
        deleted: bool,
    ) -> bool {
        let Some(name) = pod.metadata.name.clone() else {
            return true;
        };
        if name == self.myself {
            return true;
        }

        let status = pod.status.unwrap_or_default();
        let ip = status.pod_ip.unwrap_or_default();
        let running = status.phase.as_deref() == Some("Running");
        let dead = deleted || pod.metadata.deletion_timestamp.is_some() || !running;

        if ip.is_empty() && !dead {
            // Not addressable yet; a later status update will carry the IP.
            return true;
        }

        let peer = PeerInfo { name, ip };
        let event = if dead {
            info!(peer = %peer.name, ip = %peer.ip, "removing peer");
            PeerEvent::DeadPeer(peer)
        } else {
            info!(peer = %peer.name, ip = %peer.ip, "found new peer");
            PeerEvent::NewPeer(peer)
        };

        events.send(event).await.is_ok()
    }
}
