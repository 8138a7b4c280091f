//! Test fixtures: a fully meshed set of in-process peers.

use parking_lot::Mutex;
use ra_mutual_exclusion::{ExclusionService, LocalNetwork, LocalState, PeerIdentity, ServiceConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any wait in the suite.
pub const GUARD: Duration = Duration::from_secs(20);

/// Identity of the `index`-th test peer. Lower index means lower port.
pub fn identity(index: usize) -> PeerIdentity {
    PeerIdentity::new("127.0.0.1", 50_050 + index as u16, format!("peer-{index}"))
}

/// Peers sharing one `LocalNetwork`, each knowing all the others.
pub struct Cluster {
    /// The shared transport.
    pub network: LocalNetwork,
    /// One service per peer, by index.
    pub peers: Vec<ExclusionService<LocalNetwork>>,
}

impl Cluster {
    /// `size` peers with the default service configuration.
    pub fn new(size: usize) -> Self {
        Self::with_config(size, ServiceConfig::default())
    }

    /// `size` peers sharing `config`.
    pub fn with_config(size: usize, config: ServiceConfig) -> Self {
        Self::with_configs(vec![config; size])
    }

    /// One peer per configuration, in index order.
    pub fn with_configs(configs: Vec<ServiceConfig>) -> Self {
        let network = LocalNetwork::new();
        let peers: Vec<_> = configs
            .into_iter()
            .enumerate()
            .map(|(i, config)| Self::spawn_peer(&network, identity(i), config))
            .collect();

        for peer in &peers {
            peer.register_peers(peers.iter().map(|p| p.local().clone()));
        }

        Self { network, peers }
    }

    /// Attach a peer that knows the given identities but that nobody knows.
    pub fn join(
        &self,
        identity: PeerIdentity,
        knows: &[PeerIdentity],
    ) -> ExclusionService<LocalNetwork> {
        let peer = Self::spawn_peer(&self.network, identity, ServiceConfig::default());
        peer.register_peers(knows.iter().cloned());
        peer
    }

    fn spawn_peer(
        network: &LocalNetwork,
        identity: PeerIdentity,
        config: ServiceConfig,
    ) -> ExclusionService<LocalNetwork> {
        let service = ExclusionService::with_config(identity.clone(), network.clone(), config);
        network.attach(identity, Arc::new(service.clone()));
        service
    }

    /// Peer by index.
    pub fn peer(&self, index: usize) -> &ExclusionService<LocalNetwork> {
        &self.peers[index]
    }

    /// Current state of every peer.
    pub fn states(&self) -> Vec<LocalState> {
        self.peers.iter().map(|p| p.status().state).collect()
    }
}

/// Counts peers inside the critical section and remembers who entered.
#[derive(Clone, Default)]
pub struct Occupancy {
    inside: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    entries: Arc<Mutex<Vec<String>>>,
}

impl Occupancy {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// `name` entered the critical section.
    pub fn enter(&self, name: &str) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.lock().push(name.to_string());
    }

    /// Someone left the critical section.
    pub fn exit(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    /// Largest number of peers ever inside at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Entry order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// Yield until `condition` holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(GUARD, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never became true");
}
