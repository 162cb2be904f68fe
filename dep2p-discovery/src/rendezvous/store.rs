// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{DiscoveryError, Result};
use dep2p_protocol::endpoint::Clock;
use dep2p_protocol::{NodeId, PeerInfo, MAX_ADDRS_PER_PEER};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Rendezvous point configuration.
#[derive(Clone, Debug)]
pub struct RendezvousConfig {
    /// TTL granted when a registration asks for none.
    pub default_ttl: Duration,
    /// Requested TTLs are clamped to this.
    pub max_ttl: Duration,
    /// Namespace length bound.
    pub max_namespace_len: usize,
    /// Total registrations held by the point.
    pub max_registrations: usize,
    /// Distinct namespaces held by the point.
    pub max_namespaces: usize,
    /// Registrations within one namespace.
    pub max_registrations_per_namespace: usize,
    /// Namespaces one peer may occupy.
    pub max_registrations_per_peer: usize,
    /// Cadence of the expiry sweep.
    pub cleanup_interval: Duration,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(2 * 60 * 60),
            max_ttl: Duration::from_secs(72 * 60 * 60),
            max_namespace_len: 256,
            max_registrations: 10_000,
            max_namespaces: 1_000,
            max_registrations_per_namespace: 1_000,
            max_registrations_per_peer: 100,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// One namespace registration held by a point.
#[derive(Clone, Debug)]
pub struct Registration {
    pub namespace: String,
    pub peer: PeerInfo,
    pub ttl: Duration,
    pub registered_at: SystemTime,
    pub expires_at: SystemTime,
    pub signed_record: Option<Vec<u8>>,
}

/// Registration bookkeeping.
///
/// Invariant: an entry exists in `registrations[ns][node]` iff `ns` is in
/// `peer_namespaces[node]`. Every mutation updates both maps together.
/// Namespaces use a BTreeMap per namespace so pagination cookies index a
/// stable order.
pub struct RendezvousStore {
    config: RendezvousConfig,
    clock: Arc<dyn Clock>,
    registrations: HashMap<String, BTreeMap<NodeId, Registration>>,
    peer_namespaces: HashMap<NodeId, HashSet<String>>,
    total: usize,
}

impl RendezvousStore {
    pub fn new(config: RendezvousConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            registrations: HashMap::new(),
            peer_namespaces: HashMap::new(),
            total: 0,
        }
    }

    /// Registers `peer` under `namespace`, replacing any previous entry for
    /// the same peer. Returns the granted TTL.
    pub fn register(
        &mut self,
        namespace: &str,
        peer: PeerInfo,
        requested_ttl: Duration,
        signed_record: Option<Vec<u8>>,
    ) -> Result<Duration> {
        self.validate_namespace(namespace)?;
        if peer.addrs.is_empty() || peer.addrs.len() > MAX_ADDRS_PER_PEER {
            return Err(DiscoveryError::InvalidAddressCount {
                max: MAX_ADDRS_PER_PEER,
            });
        }

        let ttl = if requested_ttl.is_zero() {
            self.config.default_ttl
        } else {
            requested_ttl.min(self.config.max_ttl)
        };

        let replacing = self
            .registrations
            .get(namespace)
            .is_some_and(|ns| ns.contains_key(&peer.id));

        if !replacing {
            if self.total >= self.config.max_registrations {
                return Err(DiscoveryError::TooManyRegistrations(self.total));
            }
            if !self.registrations.contains_key(namespace)
                && self.registrations.len() >= self.config.max_namespaces
            {
                return Err(DiscoveryError::TooManyNamespaces(self.registrations.len()));
            }
            if self
                .registrations
                .get(namespace)
                .is_some_and(|ns| ns.len() >= self.config.max_registrations_per_namespace)
            {
                return Err(DiscoveryError::TooManyRegistrationsPerNamespace(
                    self.config.max_registrations_per_namespace,
                ));
            }
            if self
                .peer_namespaces
                .get(&peer.id)
                .is_some_and(|set| set.len() >= self.config.max_registrations_per_peer)
            {
                return Err(DiscoveryError::TooManyRegistrationsPerPeer(
                    self.config.max_registrations_per_peer,
                ));
            }
        }

        let now = self.clock.now();
        let registration = Registration {
            namespace: namespace.to_string(),
            peer: peer.clone(),
            ttl,
            registered_at: now,
            expires_at: now + ttl,
            signed_record,
        };

        let _ = self
            .registrations
            .entry(namespace.to_string())
            .or_default()
            .insert(peer.id.clone(), registration);
        let newly_indexed = self
            .peer_namespaces
            .entry(peer.id)
            .or_default()
            .insert(namespace.to_string());
        debug_assert_eq!(newly_indexed, !replacing);
        if !replacing {
            self.total += 1;
        }
        Ok(ttl)
    }

    /// Removes one registration; unknown entries are a no-op.
    pub fn unregister(&mut self, namespace: &str, node: &NodeId) {
        let removed = self
            .registrations
            .get_mut(namespace)
            .and_then(|ns| ns.remove(node))
            .is_some();
        if !removed {
            return;
        }
        self.total -= 1;
        if self
            .registrations
            .get(namespace)
            .is_some_and(|ns| ns.is_empty())
        {
            let _ = self.registrations.remove(namespace);
        }
        if let Some(set) = self.peer_namespaces.get_mut(node) {
            let _ = set.remove(namespace);
            if set.is_empty() {
                let _ = self.peer_namespaces.remove(node);
            }
        }
    }

    /// Lists live registrations under `namespace` from `offset`, at most
    /// `limit` (zero = unbounded). Returns the next offset when more remain.
    pub fn discover(
        &self,
        namespace: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Registration>, Option<usize>)> {
        self.validate_namespace(namespace)?;
        let now = self.clock.now();
        let Some(ns) = self.registrations.get(namespace) else {
            if offset > 0 {
                return Err(DiscoveryError::InvalidCookie);
            }
            return Ok((Vec::new(), None));
        };
        if offset > ns.len() {
            return Err(DiscoveryError::InvalidCookie);
        }

        let mut out = Vec::new();
        let mut consumed = offset;
        for registration in ns.values().skip(offset) {
            consumed += 1;
            if registration.expires_at <= now {
                continue;
            }
            out.push(registration.clone());
            if limit > 0 && out.len() == limit {
                break;
            }
        }
        let next = (consumed < ns.len()).then_some(consumed);
        Ok((out, next))
    }

    /// Registrations a peer currently holds, across namespaces.
    pub fn namespaces_of(&self, node: &NodeId) -> Vec<String> {
        self.peer_namespaces
            .get(node)
            .map(|set| {
                let mut out: Vec<String> = set.iter().cloned().collect();
                out.sort();
                out
            })
            .unwrap_or_default()
    }

    /// Drops expired registrations and empty namespaces. Returns how many
    /// registrations were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now();
        let mut expired: Vec<(String, NodeId)> = Vec::new();
        for (ns, entries) in &self.registrations {
            for (node, registration) in entries {
                if registration.expires_at <= now {
                    expired.push((ns.clone(), node.clone()));
                }
            }
        }
        for (ns, node) in &expired {
            self.unregister(ns, node);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn namespace_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    fn validate_namespace(&self, namespace: &str) -> Result<()> {
        if namespace.is_empty() || namespace.len() > self.config.max_namespace_len {
            return Err(DiscoveryError::InvalidNamespace {
                max: self.config.max_namespace_len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dep2p_protocol::endpoint::SystemClock;
    use dep2p_protocol::Multiaddr;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Clock whose wall time can be advanced by tests.
    pub(crate) struct ManualClock {
        now: Mutex<SystemTime>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }
    }

    fn peer(n: u8) -> PeerInfo {
        let id = NodeId::from_bytes(&[n; 32]).unwrap();
        let addr = Multiaddr::parse(&format!("/ip4/10.0.0.{n}/tcp/4001")).unwrap();
        PeerInfo::new(id, vec![addr], "test").unwrap()
    }

    fn store() -> RendezvousStore {
        RendezvousStore::new(RendezvousConfig::default(), Arc::new(SystemClock))
    }

    #[test]
    fn register_then_discover_before_ttl() {
        let mut store = store();
        let granted = store
            .register("chat", peer(1), Duration::from_secs(60), None)
            .unwrap();
        assert_eq!(granted, Duration::from_secs(60));
        let (found, next) = store.discover("chat", 0, 0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].peer.id, peer(1).id);
        assert!(next.is_none());
    }

    #[test]
    fn both_indexes_stay_in_sync() {
        let mut store = store();
        let _ = store
            .register("chat", peer(1), Duration::ZERO, None)
            .unwrap();
        let _ = store
            .register("games", peer(1), Duration::ZERO, None)
            .unwrap();
        assert_eq!(store.namespaces_of(&peer(1).id), vec!["chat", "games"]);

        store.unregister("chat", &peer(1).id);
        assert_eq!(store.namespaces_of(&peer(1).id), vec!["games"]);
        assert_eq!(store.len(), 1);

        store.unregister("games", &peer(1).id);
        assert!(store.namespaces_of(&peer(1).id).is_empty());
        assert!(store.is_empty());
        assert_eq!(store.namespace_count(), 0);
    }

    #[test]
    fn ttl_is_clamped_and_defaulted() {
        let mut store = store();
        let granted = store
            .register("chat", peer(1), Duration::from_secs(100 * 60 * 60), None)
            .unwrap();
        assert_eq!(granted, store.config().max_ttl);
        let granted = store
            .register("chat", peer(2), Duration::ZERO, None)
            .unwrap();
        assert_eq!(granted, store.config().default_ttl);
    }

    #[test]
    fn quotas_are_enforced() {
        let mut config = RendezvousConfig::default();
        config.max_registrations_per_namespace = 2;
        config.max_registrations_per_peer = 1;
        let mut store = RendezvousStore::new(config, Arc::new(SystemClock));

        let _ = store.register("ns", peer(1), Duration::ZERO, None).unwrap();
        let _ = store.register("ns", peer(2), Duration::ZERO, None).unwrap();
        assert!(matches!(
            store.register("ns", peer(3), Duration::ZERO, None),
            Err(DiscoveryError::TooManyRegistrationsPerNamespace(_))
        ));
        assert!(matches!(
            store.register("other", peer(1), Duration::ZERO, None),
            Err(DiscoveryError::TooManyRegistrationsPerPeer(_))
        ));
        // Re-registering is a replace, not a quota hit.
        assert!(store.register("ns", peer(1), Duration::ZERO, None).is_ok());
    }

    #[test]
    fn pagination_walks_the_full_listing() {
        let mut store = store();
        for n in 1..=5 {
            let _ = store.register("ns", peer(n), Duration::ZERO, None).unwrap();
        }
        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let (page, next) = store.discover("ns", 2, offset).unwrap();
            seen.extend(page.into_iter().map(|r| r.peer.id));
            match next {
                Some(n) => offset = n,
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
        assert!(store.discover("ns", 2, 99).is_err());
    }

    #[test]
    fn cleanup_drops_expired_and_empty_namespaces() {
        let clock = Arc::new(ManualClock::new());
        let mut store = RendezvousStore::new(RendezvousConfig::default(), clock.clone());
        let _ = store
            .register("ns", peer(1), Duration::from_secs(10), None)
            .unwrap();
        let _ = store
            .register("long", peer(2), Duration::from_secs(1000), None)
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.namespace_count(), 1);
        let (found, _) = store.discover("long", 0, 0).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn invalid_namespaces_are_rejected() {
        let mut store = store();
        assert!(store.register("", peer(1), Duration::ZERO, None).is_err());
        let long = "n".repeat(257);
        assert!(store.register(&long, peer(1), Duration::ZERO, None).is_err());
    }
}
