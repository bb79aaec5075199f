/// A peer as reported by the orchestrator: the pod name is the stable
/// identifier, the address is where its peer RPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub name: String,
    pub ip: String,
}

/// Membership changes delivered to the sync coordinator. The orchestrator
/// never updates a peer in place: a replaced pod shows up as a dead peer
/// followed by a new one under a fresh name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    NewPeer(PeerInfo),
    DeadPeer(PeerInfo),
}
