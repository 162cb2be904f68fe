// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use async_trait::async_trait;
use dep2p_discovery::{
    AccessLevel, DiscoverySource, Discoverer, DiscoveryBackend, DiscoveryConfig,
    DiscoveryCoordinator, DiscoveryError, DiscoveryQuery, PeerFinder, Scope, ServiceRegistration,
};
use dep2p_protocol::{derive_realm_id, xor_distance, Multiaddr, NodeId, PeerInfo, RealmId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn node(n: u8) -> NodeId {
    NodeId::from_bytes(&[n; 32]).unwrap()
}

fn peer(n: u8, source: &str) -> PeerInfo {
    let addr = Multiaddr::parse(&format!("/ip4/10.0.0.{n}/tcp/4001")).unwrap();
    PeerInfo::new(node(n), vec![addr], source).unwrap()
}

fn realm() -> RealmId {
    derive_realm_id(b"test-psk-key-123456")
}

fn coordinator() -> Arc<DiscoveryCoordinator> {
    let mut config = DiscoveryConfig::default();
    config.find_peer_timeout = Duration::from_millis(300);
    config.per_source_timeout = Duration::from_millis(500);
    config.query_timeout = Duration::from_secs(2);
    DiscoveryCoordinator::with_clock(
        config,
        Arc::new(dep2p_protocol::endpoint::SystemClock),
    )
    .unwrap()
}

/// A canned-response backend advertising discoverer and finder capability.
struct StaticBackend {
    source: DiscoverySource,
    peers: Vec<PeerInfo>,
    calls: AtomicUsize,
}

impl StaticBackend {
    fn new(source: DiscoverySource, peers: Vec<PeerInfo>) -> Arc<Self> {
        Arc::new(Self {
            source,
            peers,
            calls: AtomicUsize::new(0),
        })
    }
}

impl DiscoveryBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        Some(self)
    }

    fn as_peer_finder(&self) -> Option<&dyn PeerFinder> {
        Some(self)
    }
}

#[async_trait]
impl Discoverer for StaticBackend {
    fn source(&self) -> DiscoverySource {
        self.source
    }

    async fn discover(
        &self,
        _key: &str,
        _limit: usize,
    ) -> Result<Vec<PeerInfo>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.peers.clone())
    }
}

#[async_trait]
impl PeerFinder for StaticBackend {
    async fn find_peer(&self, id: &NodeId) -> Result<Option<PeerInfo>, DiscoveryError> {
        Ok(self.peers.iter().find(|p| &p.id == id).cloned())
    }
}

// ---------- Scope resolution ----------

#[test]
fn sys_prefix_forces_system_scope() {
    let coordinator = coordinator();
    coordinator.join_realm(realm(), AccessLevel::Public, HashSet::new());

    let resolved = coordinator.resolve_scope("sys:relay", Scope::Auto, &RealmId::default());
    assert_eq!(resolved.full_key, "dep2p/v1/sys/relay");
    assert_eq!(resolved.scope, Scope::Sys);
}

#[test]
fn auto_scope_follows_the_joined_realm() {
    let coordinator = coordinator();
    coordinator.join_realm(realm(), AccessLevel::Public, HashSet::new());

    let resolved = coordinator.resolve_scope("chat", Scope::Auto, &RealmId::default());
    assert_eq!(
        resolved.full_key,
        format!("dep2p/v1/realm/{}/chat", realm().as_str())
    );
    assert_eq!(resolved.scope, Scope::Realm);
}

#[test]
fn auto_scope_without_realm_is_system() {
    let coordinator = coordinator();
    let resolved = coordinator.resolve_scope("chat", Scope::Auto, &RealmId::default());
    assert_eq!(resolved.full_key, "dep2p/v1/sys/chat");
    assert_eq!(resolved.scope, Scope::Sys);
}

// ---------- Source priority merge ----------

#[tokio::test]
async fn merge_keeps_the_highest_priority_source() {
    let coordinator = coordinator();
    // peer 1 is known locally and also reported by the Provider source.
    assert!(coordinator.admit_peer(peer(1, "local"), RealmId::default()));
    coordinator.register_backend(StaticBackend::new(
        DiscoverySource::Provider,
        vec![peer(1, "provider")],
    ));

    let mut rx = coordinator.discover(DiscoveryQuery::for_namespace("sys:bootstrap"));
    let mut results = Vec::new();
    while let Some(found) = rx.recv().await {
        results.push(found);
    }
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, "provider");
}

#[tokio::test]
async fn limit_bounds_the_result_stream() {
    let coordinator = coordinator();
    coordinator.register_backend(StaticBackend::new(
        DiscoverySource::Provider,
        vec![peer(1, "provider"), peer(2, "provider"), peer(3, "provider")],
    ));

    let mut query = DiscoveryQuery::for_namespace("sys:bootstrap");
    query.limit = 2;
    let mut rx = coordinator.discover(query);
    let mut results = Vec::new();
    while let Some(found) = rx.recv().await {
        results.push(found);
    }
    assert_eq!(results.len(), 2);
}

// ---------- FindPeer ladder ----------

#[tokio::test]
async fn find_peer_hits_the_local_cache_first() {
    let coordinator = coordinator();
    assert!(coordinator.admit_peer(peer(4, "local"), RealmId::default()));
    let found = coordinator.find_peer(&node(4)).await.unwrap();
    assert_eq!(found.id, node(4));
}

#[tokio::test]
async fn find_peer_queries_the_network_and_wakes_waiters() {
    let coordinator = coordinator();
    coordinator.register_backend(StaticBackend::new(
        DiscoverySource::Provider,
        vec![peer(5, "provider")],
    ));
    let found = coordinator.find_peer(&node(5)).await.unwrap();
    assert_eq!(found.id, node(5));
    // The admission also landed in the cache.
    assert_eq!(coordinator.known_peer_count(), 1);
}

#[tokio::test]
async fn find_peer_times_out_on_an_empty_network() {
    let coordinator = coordinator();
    let result = coordinator.find_peer(&node(9)).await;
    assert!(matches!(
        result,
        Err(DiscoveryError::PeerLookupTimeout(_))
    ));
}

/// Backend that loops back into the coordinator, as a DHT dial path would.
struct RecursiveBackend {
    coordinator: Mutex<Option<Arc<DiscoveryCoordinator>>>,
    inner_result: Mutex<Option<Result<PeerInfo, DiscoveryError>>>,
}

impl DiscoveryBackend for RecursiveBackend {
    fn name(&self) -> &'static str {
        "recursive"
    }

    fn as_peer_finder(&self) -> Option<&dyn PeerFinder> {
        Some(self)
    }
}

#[async_trait]
impl PeerFinder for RecursiveBackend {
    async fn find_peer(&self, id: &NodeId) -> Result<Option<PeerInfo>, DiscoveryError> {
        let coordinator = self.coordinator.lock().unwrap().clone().unwrap();
        let inner = coordinator.find_peer(id).await;
        *self.inner_result.lock().unwrap() = Some(inner);
        Ok(None)
    }
}

#[tokio::test]
async fn nested_lookup_of_the_same_id_is_recursive_discovery() {
    let coordinator = coordinator();
    let backend = Arc::new(RecursiveBackend {
        coordinator: Mutex::new(Some(Arc::clone(&coordinator))),
        inner_result: Mutex::new(None),
    });
    coordinator.register_backend(Arc::clone(&backend) as Arc<dyn DiscoveryBackend>);

    let _ = coordinator.find_peer(&node(6)).await;
    let inner = backend.inner_result.lock().unwrap().take();
    assert!(matches!(
        inner,
        Some(Err(DiscoveryError::RecursiveDiscovery(_)))
    ));
}

// ---------- Realm filter ----------

#[tokio::test]
async fn private_realms_admit_members_only() {
    let coordinator = coordinator();
    let members: HashSet<NodeId> = [node(1)].into_iter().collect();
    coordinator.join_realm(realm(), AccessLevel::Private, members);

    assert!(coordinator.admit_peer(peer(1, "provider"), realm()));
    // Same realm, not a member.
    assert!(!coordinator.admit_peer(peer(2, "provider"), realm()));
    // Member id arriving under a different realm.
    assert!(!coordinator.admit_peer(peer(1, "provider"), RealmId::default()));
    assert_eq!(coordinator.known_peer_count(), 1);
}

// ---------- Closest peers ----------

#[tokio::test]
async fn closest_peers_sort_by_xor_distance() {
    let coordinator = coordinator();
    for n in 1..=20u8 {
        assert!(coordinator.admit_peer(peer(n, "local"), RealmId::default()));
    }
    let key = [0u8; 32];
    let closest = coordinator.find_closest_peers(&key, 5);
    assert_eq!(closest.len(), 5);

    let target = dep2p_protocol::to_key_bytes(&key);
    let mut previous = xor_distance(closest[0].as_bytes(), &target);
    for id in &closest[1..] {
        let distance = xor_distance(id.as_bytes(), &target);
        assert!(previous <= distance);
        previous = distance;
    }
}

#[tokio::test]
async fn closest_peers_with_zero_count_is_empty() {
    let coordinator = coordinator();
    assert!(coordinator.admit_peer(peer(1, "local"), RealmId::default()));
    assert!(coordinator.find_closest_peers(&[0u8; 32], 0).is_empty());
}

// ---------- Registration bookkeeping ----------

/// Announcer that only counts calls.
struct CountingAnnouncer {
    announces: AtomicUsize,
}

impl CountingAnnouncer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            announces: AtomicUsize::new(0),
        })
    }
}

impl DiscoveryBackend for CountingAnnouncer {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn as_announcer(&self) -> Option<&dyn dep2p_discovery::Announcer> {
        Some(self)
    }
}

#[async_trait]
impl dep2p_discovery::Announcer for CountingAnnouncer {
    async fn announce(
        &self,
        _key: &str,
        _record: &[u8],
        _ttl: Duration,
    ) -> Result<(), DiscoveryError> {
        self.announces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_announce(&self, _key: &str) -> Result<(), DiscoveryError> {
        Ok(())
    }
}

#[tokio::test]
async fn provider_announce_goes_to_the_first_registered_announcer() {
    let coordinator = coordinator();
    let first = CountingAnnouncer::new();
    let second = CountingAnnouncer::new();
    coordinator.register_backend(Arc::clone(&first) as Arc<dyn DiscoveryBackend>);
    coordinator.register_backend(Arc::clone(&second) as Arc<dyn DiscoveryBackend>);

    let mut registration = ServiceRegistration::default();
    registration.namespace = "sys:chat".to_string();
    registration.sources = vec![DiscoverySource::Provider];
    coordinator.register_service(registration).await.unwrap();

    // Registration order decides: the first announcer carries the announce,
    // the second never sees it.
    assert_eq!(first.announces.load(Ordering::SeqCst), 1);
    assert_eq!(second.announces.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn register_service_records_the_registration() {
    let coordinator = coordinator();
    coordinator.register_backend(StaticBackend::new(DiscoverySource::Provider, Vec::new()));

    let mut registration = ServiceRegistration::default();
    registration.namespace = "sys:chat".to_string();
    registration.ttl = Duration::from_secs(120);
    coordinator.register_service(registration).await.unwrap();

    coordinator
        .unregister_service("sys:chat", Scope::Auto, &RealmId::default())
        .await
        .unwrap();
}

// ---------- Lifecycle ----------

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let coordinator = coordinator();
    assert!(coordinator.start().is_ok());
    assert!(coordinator.start().is_ok());
    assert!(coordinator.stop().is_ok());
    assert!(coordinator.stop().is_ok());
    // Post-close lookups fail fast.
    assert!(matches!(
        coordinator.find_peer(&node(1)).await,
        Err(DiscoveryError::Closed)
    ));
}
