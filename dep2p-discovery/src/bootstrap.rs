// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Bootstrap contact list backend.
//!
//! Connects to statically configured peers by expected NodeId, tracks
//! per-peer health with jittered exponential backoff, and gossips additional
//! peers from every successful connection.

use crate::backend::{Announcer, Discoverer, DiscoveryBackend, PeerGossip};
use crate::error::{DiscoveryError, Result};
use crate::types::{BootstrapPeer, DiscoverySource};
use async_trait::async_trait;
use dep2p_protocol::endpoint::Endpoint;
use dep2p_protocol::{NodeId, PeerInfo};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Source tag carried by bootstrap results.
const BOOTSTRAP_SOURCE: &str = "bootstrap";

/// Bootstrap backend configuration.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// First-retry backoff base.
    pub retry_interval: Duration,
    /// Backoff growth factor per consecutive failure.
    pub backoff_multiplier: f64,
    /// Backoff ceiling.
    pub max_backoff_interval: Duration,
    /// Jitter fraction applied to every backoff (±).
    pub backoff_jitter: f64,
    /// Consecutive failures before a peer is marked unhealthy.
    pub unhealthy_threshold: u32,
    /// Retry cadence for unhealthy peers.
    pub recovery_backoff: Duration,
    /// Cadence of the health-check loop.
    pub health_check_interval: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_backoff_interval: Duration::from_secs(5 * 60),
            backoff_jitter: 0.2,
            unhealthy_threshold: 3,
            recovery_backoff: Duration::from_secs(2 * 60),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

/// Connection health of one configured bootstrap peer.
#[derive(Clone, Debug)]
pub struct PeerHealth {
    pub fail_count: u32,
    pub current_backoff: Duration,
    pub is_healthy: bool,
    pub connected: bool,
    next_retry_at: Option<Instant>,
}

impl Default for PeerHealth {
    fn default() -> Self {
        Self {
            fail_count: 0,
            current_backoff: Duration::ZERO,
            is_healthy: true,
            connected: false,
            next_retry_at: None,
        }
    }
}

impl PeerHealth {
    fn due_for_retry(&self, now: Instant) -> bool {
        !self.connected && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Static-peer-list discoverer with health-tracked reconnects.
pub struct BootstrapDiscoverer {
    config: BootstrapConfig,
    peers: Vec<BootstrapPeer>,
    endpoint: Arc<dyn Endpoint>,
    gossip: Option<Arc<dyn PeerGossip>>,
    health: Mutex<HashMap<NodeId, PeerHealth>>,
    /// Peers learned through gossip, served alongside the static list.
    gossiped: Mutex<HashMap<NodeId, PeerInfo>>,
    announcing: AtomicBool,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl BootstrapDiscoverer {
    pub fn new(
        config: BootstrapConfig,
        peers: Vec<BootstrapPeer>,
        endpoint: Arc<dyn Endpoint>,
        gossip: Option<Arc<dyn PeerGossip>>,
    ) -> Arc<Self> {
        if peers.is_empty() {
            warn!("{}", DiscoveryError::NoBootstrapPeers);
        }
        Arc::new(Self {
            config,
            peers,
            endpoint,
            gossip,
            health: Mutex::new(HashMap::new()),
            gossiped: Mutex::new(HashMap::new()),
            announcing: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        })
    }

    /// Starts the health-check loop and kicks an initial connection round.
    /// Idempotent: a second call is a successful no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if self.peers.is_empty() {
            // Dormant: nothing to connect to, nothing to loop over.
            return Ok(());
        }

        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock().expect("bootstrap shutdown lock") = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            this.connect_due_peers().await;
            this.health_check_loop(rx).await;
        });
        Ok(())
    }

    /// Stops the loops. Idempotent: stopping a stopped discoverer succeeds.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.lock().expect("bootstrap shutdown lock").take() {
            let _ = tx.send(true);
        }
        Ok(())
    }

    /// Contacts every configured peer in parallel, ignoring backoff. Used by
    /// emergency recovery.
    pub async fn connect_all_parallel(self: &Arc<Self>) {
        let mut tasks = Vec::with_capacity(self.peers.len());
        for peer in self.peers.clone() {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                this.try_connect(&peer).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Whether the bootstrap announcer is currently active.
    pub fn is_announcing(&self) -> bool {
        self.announcing.load(Ordering::SeqCst)
    }

    /// Health snapshot of one configured peer.
    pub fn peer_health(&self, node: &NodeId) -> Option<PeerHealth> {
        self.health
            .lock()
            .expect("bootstrap health lock")
            .get(node)
            .cloned()
    }

    async fn health_check_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.health_check_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.connect_due_peers().await;
                }
                _ = shutdown.changed() => {
                    trace!("Bootstrap health-check loop shutting down");
                    return;
                }
            }
        }
    }

    async fn connect_due_peers(self: &Arc<Self>) {
        let now = Instant::now();
        let due: Vec<BootstrapPeer> = {
            let health = self.health.lock().expect("bootstrap health lock");
            self.peers
                .iter()
                .filter(|peer| {
                    health
                        .get(&peer.id)
                        .map_or(true, |h| h.due_for_retry(now))
                })
                .cloned()
                .collect()
        };
        for peer in due {
            self.try_connect(&peer).await;
        }
    }

    async fn try_connect(self: &Arc<Self>, peer: &BootstrapPeer) {
        match self.endpoint.dial(&peer.id, &peer.addrs).await {
            Ok(()) => {
                debug!("Connected to bootstrap peer {:?}", peer.id);
                self.record_success(&peer.id);
                self.fetch_peers_from(&peer.id).await;
            }
            Err(err) => {
                debug!("Bootstrap dial to {:?} failed: {err}", peer.id);
                self.record_failure(&peer.id);
            }
        }
    }

    /// Gossip: ask the freshly connected peer for more peers.
    async fn fetch_peers_from(&self, node: &NodeId) {
        let Some(gossip) = self.gossip.as_ref() else {
            return;
        };
        match gossip.fetch_peers(node).await {
            Ok(peers) => {
                let mut gossiped = self.gossiped.lock().expect("bootstrap gossip lock");
                for peer in peers {
                    gossiped.insert(peer.id.clone(), peer);
                }
            }
            Err(err) => debug!("Peer gossip from {node:?} failed: {err}"),
        }
    }

    fn record_success(&self, node: &NodeId) {
        let mut health = self.health.lock().expect("bootstrap health lock");
        let entry = health.entry(node.clone()).or_default();
        entry.fail_count = 0;
        entry.current_backoff = Duration::ZERO;
        entry.is_healthy = true;
        entry.connected = true;
        entry.next_retry_at = None;
    }

    fn record_failure(&self, node: &NodeId) {
        let now = Instant::now();
        let mut health = self.health.lock().expect("bootstrap health lock");
        let entry = health.entry(node.clone()).or_default();
        entry.connected = false;
        entry.fail_count = entry.fail_count.saturating_add(1);

        if entry.fail_count >= self.config.unhealthy_threshold {
            if entry.is_healthy {
                warn!(
                    "Bootstrap peer {node:?} unhealthy after {} failures",
                    entry.fail_count
                );
            }
            entry.is_healthy = false;
            entry.current_backoff = self.config.recovery_backoff;
            entry.next_retry_at = Some(now + self.config.recovery_backoff);
            return;
        }

        let backoff = self.next_backoff(entry.fail_count);
        entry.current_backoff = backoff;
        entry.next_retry_at = Some(now + backoff);
    }

    /// `retry_interval × multiplier^fail_count`, clamped, then jittered by
    /// ±`backoff_jitter` of itself.
    fn next_backoff(&self, fail_count: u32) -> Duration {
        let base = self.config.retry_interval.as_secs_f64()
            * self.config.backoff_multiplier.powi(fail_count as i32 - 1);
        let clamped = base.min(self.config.max_backoff_interval.as_secs_f64());
        let jitter = rand::thread_rng()
            .gen_range(-self.config.backoff_jitter..=self.config.backoff_jitter);
        Duration::from_secs_f64((clamped * (1.0 + jitter)).max(0.0))
    }

    fn static_peer_infos(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .filter_map(|peer| {
                PeerInfo::new(peer.id.clone(), peer.addrs.clone(), BOOTSTRAP_SOURCE).ok()
            })
            .collect()
    }
}

impl DiscoveryBackend for BootstrapDiscoverer {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        Some(self)
    }

    fn as_announcer(&self) -> Option<&dyn Announcer> {
        Some(self)
    }
}

#[async_trait]
impl Discoverer for BootstrapDiscoverer {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Provider
    }

    async fn discover(&self, _key: &str, limit: usize) -> Result<Vec<PeerInfo>> {
        let mut out = self.static_peer_infos();
        {
            let gossiped = self.gossiped.lock().expect("bootstrap gossip lock");
            out.extend(gossiped.values().cloned());
        }
        if limit > 0 {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[async_trait]
impl Announcer for BootstrapDiscoverer {
    async fn announce(&self, key: &str, _record: &[u8], _ttl: Duration) -> Result<()> {
        trace!("Bootstrap announcing under {key}");
        self.announcing.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stops announcing entirely, not per key: the bootstrap announcer has a
    /// single on/off state.
    async fn stop_announce(&self, _key: &str) -> Result<()> {
        self.announcing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dep2p_protocol::endpoint::BoxStream;
    use dep2p_protocol::Multiaddr;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    struct FlakyEndpoint {
        local: NodeId,
        fail: AtomicBool,
        dials: AtomicUsize,
    }

    #[async_trait]
    impl Endpoint for FlakyEndpoint {
        fn local_node(&self) -> NodeId {
            self.local.clone()
        }

        fn local_addrs(&self) -> Vec<Multiaddr> {
            Vec::new()
        }

        async fn open_stream(&self, _node: &NodeId, _protocol: &str) -> io::Result<BoxStream> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no streams"))
        }

        async fn dial(&self, _node: &NodeId, _addrs: &[Multiaddr]) -> io::Result<()> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                Ok(())
            }
        }

        fn connected_nodes(&self) -> Vec<NodeId> {
            Vec::new()
        }

        fn remote_addrs(&self, _node: &NodeId) -> Vec<Multiaddr> {
            Vec::new()
        }
    }

    fn peer(n: u8) -> BootstrapPeer {
        let id = NodeId::from_bytes(&[n; 32]).unwrap();
        let addr = Multiaddr::parse(&format!("/ip4/10.0.0.{n}/tcp/4001"))
            .unwrap()
            .with_p2p(&id);
        BootstrapPeer {
            id,
            addrs: vec![addr],
        }
    }

    fn endpoint(fail: bool) -> Arc<FlakyEndpoint> {
        Arc::new(FlakyEndpoint {
            local: NodeId::from_bytes(&[0xFF; 32]).unwrap(),
            fail: AtomicBool::new(fail),
            dials: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn failures_grow_backoff_until_unhealthy() {
        let ep = endpoint(true);
        let boot = BootstrapDiscoverer::new(
            BootstrapConfig::default(),
            vec![peer(1)],
            ep.clone(),
            None,
        );

        let target = peer(1).id;
        for _ in 0..2 {
            boot.try_connect(&peer(1)).await;
        }
        let health = boot.peer_health(&target).unwrap();
        assert_eq!(health.fail_count, 2);
        assert!(health.is_healthy);
        // Second failure backs off around 60s, within the ±20% jitter band.
        assert!(health.current_backoff >= Duration::from_secs(48));
        assert!(health.current_backoff <= Duration::from_secs(72));

        boot.try_connect(&peer(1)).await;
        let health = boot.peer_health(&target).unwrap();
        assert!(!health.is_healthy);
        assert_eq!(health.current_backoff, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn success_resets_health() {
        let ep = endpoint(true);
        let boot = BootstrapDiscoverer::new(
            BootstrapConfig::default(),
            vec![peer(1)],
            ep.clone(),
            None,
        );
        for _ in 0..4 {
            boot.try_connect(&peer(1)).await;
        }
        assert!(!boot.peer_health(&peer(1).id).unwrap().is_healthy);

        ep.fail.store(false, Ordering::SeqCst);
        boot.try_connect(&peer(1)).await;
        let health = boot.peer_health(&peer(1).id).unwrap();
        assert!(health.is_healthy);
        assert!(health.connected);
        assert_eq!(health.fail_count, 0);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let boot = BootstrapDiscoverer::new(
            BootstrapConfig::default(),
            vec![peer(1)],
            endpoint(false),
            None,
        );
        assert!(boot.start().is_ok());
        assert!(boot.start().is_ok());
        assert!(boot.stop().is_ok());
        assert!(boot.stop().is_ok());
    }

    #[tokio::test]
    async fn stop_announce_stops_the_announcer_entirely() {
        let boot = BootstrapDiscoverer::new(
            BootstrapConfig::default(),
            vec![peer(1)],
            endpoint(false),
            None,
        );
        boot.announce("dep2p/v1/sys/chat", b"record", Duration::from_secs(60))
            .await
            .unwrap();
        boot.announce("dep2p/v1/sys/relay", b"record", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(boot.is_announcing());
        // One key suffices: the announcer has a single on/off state.
        boot.stop_announce("dep2p/v1/sys/chat").await.unwrap();
        assert!(!boot.is_announcing());
    }

    #[tokio::test]
    async fn discover_serves_static_list() {
        let boot = BootstrapDiscoverer::new(
            BootstrapConfig::default(),
            vec![peer(1), peer(2)],
            endpoint(false),
            None,
        );
        let found = boot.discover("dep2p/v1/sys/bootstrap", 0).await.unwrap();
        assert_eq!(found.len(), 2);
        let found = boot.discover("dep2p/v1/sys/bootstrap", 1).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
