// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The discovery coordinator.
//!
//! Federates every registered backend behind one query/register surface:
//! multi-source `discover` with a priority merge, TTL-renewed service
//! registration, a local-first `find_peer` ladder, and realm-filtered peer
//! admission. Four background loops keep the peer cache warm, announced,
//! pruned and renewed.

use crate::backend::DiscoveryBackend;
use crate::bootstrap::BootstrapDiscoverer;
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::interval::DynamicInterval;
use crate::types::{
    AccessLevel, ActiveRegistration, DiscoveryQuery, DiscoverySource, KnownPeer, ResolvedScope,
    Scope, ServiceRegistration,
};
use dep2p_protocol::endpoint::{AddressBook, Clock, Endpoint, SystemClock};
use dep2p_protocol::version::{
    realm_namespace_key, sys_namespace_key, NS_BOOTSTRAP, SYS_NAMESPACE_PREFIX,
};
use dep2p_protocol::{realm_aware_key, to_key_bytes, xor_distance, NodeId, PeerInfo, RealmId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Delay before the first announce round.
const ANNOUNCE_WARMUP: Duration = Duration::from_secs(5);
/// Source tag for peers surfaced from the local cache.
const LOCAL_SOURCE: &str = "local";
/// Source tag for peers surfaced from the address book.
const ADDRESS_BOOK_SOURCE: &str = "addressbook";
/// Source tag for peers surfaced from live connections.
const CONNECTION_SOURCE: &str = "connection";

tokio::task_local! {
    /// NodeIds being resolved on the current task's call stack. Breaks the
    /// discovery -> dial -> discovery cycle.
    static RESOLVING: RefCell<HashSet<NodeId>>;
}

/// Removes one `find_peer` waiter when its call unwinds, times out or is
/// cancelled.
struct LookupGuard<'a> {
    coordinator: &'a DiscoveryCoordinator,
    id: NodeId,
    token: u64,
}

impl Drop for LookupGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.remove_lookup_waiter(&self.id, self.token);
    }
}

#[derive(Default)]
struct State {
    known_peers: HashMap<NodeId, KnownPeer>,
    backends: Vec<Arc<dyn DiscoveryBackend>>,
    current_realm: RealmId,
    access_level: AccessLevel,
    members: HashSet<NodeId>,
    active_registrations: HashMap<String, ActiveRegistration>,
}

/// Multi-source discovery coordinator.
pub struct DiscoveryCoordinator {
    config: DiscoveryConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
    /// Pending `find_peer` waiters, keyed by target then waiter token.
    /// Guarded separately from `state`; the two locks are never held at once.
    lookups: Mutex<HashMap<NodeId, HashMap<u64, oneshot::Sender<PeerInfo>>>>,
    lookup_token: AtomicU64,
    interval: Mutex<DynamicInterval>,
    endpoint: RwLock<Option<Arc<dyn Endpoint>>>,
    address_book: RwLock<Option<Arc<dyn AddressBook>>>,
    bootstrap: RwLock<Option<Arc<BootstrapDiscoverer>>>,
    running: AtomicBool,
    closed: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl DiscoveryCoordinator {
    pub fn new(config: DiscoveryConfig) -> Result<Arc<Self>> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DiscoveryConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        config.validate()?;
        let interval = DynamicInterval::new(&config);
        Ok(Arc::new(Self {
            config,
            clock,
            state: RwLock::new(State::default()),
            lookups: Mutex::new(HashMap::new()),
            lookup_token: AtomicU64::new(0),
            interval: Mutex::new(interval),
            endpoint: RwLock::new(None),
            address_book: RwLock::new(None),
            bootstrap: RwLock::new(None),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        }))
    }

    // --------------------------------------------
    // ---------- Wiring --------------------------
    // --------------------------------------------

    pub fn set_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        *self.endpoint.write().expect("endpoint lock") = Some(endpoint);
    }

    pub fn set_address_book(&self, address_book: Arc<dyn AddressBook>) {
        *self.address_book.write().expect("address book lock") = Some(address_book);
    }

    /// Registers a backend; every capability it advertises becomes visible to
    /// queries from this point on.
    pub fn register_backend(&self, backend: Arc<dyn DiscoveryBackend>) {
        debug!("Registering discovery backend {:?}", backend.name());
        self.state
            .write()
            .expect("coordinator state lock")
            .backends
            .push(backend);
    }

    /// Wires the bootstrap list used for emergency reconnects.
    pub fn set_bootstrap(&self, bootstrap: Arc<BootstrapDiscoverer>) {
        *self.bootstrap.write().expect("bootstrap ref lock") = Some(bootstrap);
    }

    /// Joins a realm: subsequent discovery, announces and admission are
    /// scoped to it.
    pub fn join_realm(&self, realm: RealmId, access_level: AccessLevel, members: HashSet<NodeId>) {
        let mut state = self.state.write().expect("coordinator state lock");
        info!("Joining realm {realm} ({access_level})");
        state.current_realm = realm;
        state.access_level = access_level;
        state.members = members;
    }

    pub fn leave_realm(&self) {
        let mut state = self.state.write().expect("coordinator state lock");
        state.current_realm = RealmId::default();
        state.access_level = AccessLevel::Public;
        state.members.clear();
    }

    pub fn current_realm(&self) -> RealmId {
        self.state
            .read()
            .expect("coordinator state lock")
            .current_realm
            .clone()
    }

    // --------------------------------------------
    // ---------- Lifecycle -----------------------
    // --------------------------------------------

    /// Starts the background loops. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Closed);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock().expect("shutdown lock") = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(this.run(rx));
        Ok(())
    }

    /// Stops the loops and closes every pending lookup so waiters observe
    /// end-of-stream. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.closed.store(true, Ordering::SeqCst);
        if let Some(tx) = self.shutdown.lock().expect("shutdown lock").take() {
            let _ = tx.send(true);
        }
        // Dropping the senders wakes every waiter with a closed channel.
        self.lookups.lock().expect("lookup lock").clear();
        Ok(())
    }

    /// The driver loop: one round immediately, then four timers.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.discovery_round().await;

        let mut next_discovery = {
            let count = self.known_peer_count();
            self.interval.lock().expect("interval lock").calculate(count)
        };
        let mut announce_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + ANNOUNCE_WARMUP,
            self.config.refresh_interval,
        );
        let mut cleanup_tick = tokio::time::interval(self.config.cleanup_interval);
        let mut renewal_tick = tokio::time::interval(self.config.renewal_interval);
        // The first tick of a tokio interval fires immediately; swallow the
        // cleanup/renewal ones so the cadence starts one period out.
        cleanup_tick.tick().await;
        renewal_tick.tick().await;

        // The discovery timer is pinned so the other branches firing does
        // not reset it mid-wait.
        let discovery_sleep = tokio::time::sleep(next_discovery);
        tokio::pin!(discovery_sleep);

        loop {
            tokio::select! {
                _ = &mut discovery_sleep => {
                    self.discovery_round().await;
                    let count = self.known_peer_count();
                    next_discovery = self
                        .interval
                        .lock()
                        .expect("interval lock")
                        .calculate(count);
                    trace!("Next discovery round in {next_discovery:?}");
                    discovery_sleep
                        .as_mut()
                        .reset(tokio::time::Instant::now() + next_discovery);
                }
                _ = announce_tick.tick() => {
                    self.announce_round().await;
                }
                _ = cleanup_tick.tick() => {
                    self.cleanup_round();
                }
                _ = renewal_tick.tick() => {
                    self.renewal_round().await;
                }
                _ = shutdown.changed() => {
                    trace!("Coordinator loops shutting down");
                    return;
                }
            }
        }
    }

    // --------------------------------------------
    // ---------- Scope resolution ----------------
    // --------------------------------------------

    /// Resolves `(namespace, scope, explicit realm)` to an effective scope
    /// and full discovery key.
    pub fn resolve_scope(
        &self,
        namespace: &str,
        scope: Scope,
        explicit_realm: &RealmId,
    ) -> ResolvedScope {
        let (namespace, scope) = match namespace.strip_prefix(SYS_NAMESPACE_PREFIX) {
            Some(stripped) => (stripped, Scope::Sys),
            None => (namespace, scope),
        };

        let realm = if explicit_realm.is_default() {
            self.current_realm()
        } else {
            explicit_realm.clone()
        };

        let effective = match scope {
            Scope::Auto => {
                if realm.is_default() {
                    Scope::Sys
                } else {
                    Scope::Realm
                }
            }
            explicit => explicit,
        };

        match effective {
            Scope::Realm if !realm.is_default() => ResolvedScope {
                scope: Scope::Realm,
                namespace: namespace.to_string(),
                full_key: realm_namespace_key(&realm, namespace),
                realm_id: realm,
            },
            _ => ResolvedScope {
                scope: Scope::Sys,
                namespace: namespace.to_string(),
                full_key: sys_namespace_key(namespace),
                realm_id: RealmId::default(),
            },
        }
    }

    // --------------------------------------------
    // ---------- Unified discover ----------------
    // --------------------------------------------

    /// Fans the query out to each requested source and streams the merged
    /// result set: deduplicated by NodeId keeping the highest-priority
    /// source, emitted sorted by (priority, insertion order), bounded by
    /// `limit` when non-zero.
    pub fn discover(self: &Arc<Self>, query: DiscoveryQuery) -> mpsc::Receiver<PeerInfo> {
        let resolved = self.resolve_scope(&query.namespace, query.scope, &query.realm_id);
        debug!(
            "Discover {:?} via {:?} (limit {})",
            resolved.full_key, query.sources, query.limit
        );

        let (tx, rx) = mpsc::channel(64.max(query.limit.min(1024)));
        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let deadline = if query.timeout.is_zero() {
                this.config.query_timeout
            } else {
                query.timeout
            };
            let merged =
                match tokio::time::timeout(deadline, this.gather(&query, &resolved)).await {
                    Ok(merged) => merged,
                    Err(_) => {
                        debug!("Discover of {} hit the query deadline", resolved.full_key);
                        Vec::new()
                    }
                };
            for peer in merged {
                if tx.send(peer).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    /// Collects every source's results and performs the priority merge.
    async fn gather(
        self: &Arc<Self>,
        query: &DiscoveryQuery,
        resolved: &ResolvedScope,
    ) -> Vec<PeerInfo> {
        let mut tasks = Vec::with_capacity(query.sources.len());
        for (priority, source) in query.sources.iter().enumerate() {
            let this = Arc::clone(self);
            let source = *source;
            let key = resolved.full_key.clone();
            let limit = query.limit;
            let include_local = query.include_local;
            let per_source = self.config.per_source_timeout;
            tasks.push(tokio::spawn(async move {
                let peers = match tokio::time::timeout(
                    per_source,
                    this.query_source(source, &key, limit, include_local),
                )
                .await
                {
                    Ok(peers) => peers,
                    Err(_) => {
                        debug!("Source {source} timed out for {key}");
                        Vec::new()
                    }
                };
                (priority, peers)
            }));
        }

        // NodeId -> (priority, insertion order, peer); lower wins.
        let mut merged: HashMap<NodeId, (usize, usize, PeerInfo)> = HashMap::new();
        for task in tasks {
            let Ok((priority, peers)) = task.await else {
                continue;
            };
            for (insertion, peer) in peers.into_iter().enumerate() {
                match merged.get(&peer.id) {
                    Some((kept, _, _)) if *kept <= priority => {}
                    _ => {
                        let _ = merged.insert(peer.id.clone(), (priority, insertion, peer));
                    }
                }
            }
        }

        let mut ordered: Vec<(usize, usize, PeerInfo)> = merged.into_values().collect();
        ordered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let mut out: Vec<PeerInfo> = ordered.into_iter().map(|(_, _, peer)| peer).collect();
        if query.limit > 0 {
            out.truncate(query.limit);
        }
        out
    }

    /// One source's contribution to a query. Backend errors are logged and
    /// yield an empty set; they never fail the query.
    async fn query_source(
        self: &Arc<Self>,
        source: DiscoverySource,
        key: &str,
        limit: usize,
        include_local: bool,
    ) -> Vec<PeerInfo> {
        match source {
            DiscoverySource::Local => self.local_peers(include_local),
            DiscoverySource::Provider | DiscoverySource::Rendezvous => {
                let backends = self.backends_snapshot();
                let mut out = Vec::new();
                for backend in backends {
                    let Some(discoverer) = backend.as_discoverer() else {
                        continue;
                    };
                    if discoverer.source() != source {
                        continue;
                    }
                    match discoverer.discover(key, limit).await {
                        Ok(peers) => {
                            for peer in peers {
                                if self.admit_peer(peer.clone(), self.realm_of_key(key)) {
                                    out.push(peer);
                                }
                            }
                        }
                        Err(err) => {
                            // One backend's failure never fails the merge.
                            warn!("Backend {} failed for {key}: {err}", backend.name());
                        }
                    }
                }
                out
            }
        }
    }

    fn local_peers(&self, include_local: bool) -> Vec<PeerInfo> {
        let state = self.state.read().expect("coordinator state lock");
        let mut out: Vec<PeerInfo> = state
            .known_peers
            .values()
            .map(|known| known.info.clone())
            .collect();
        drop(state);

        if include_local {
            if let Some(endpoint) = self.endpoint_snapshot() {
                if let Ok(peer) = PeerInfo::new(
                    endpoint.local_node(),
                    endpoint.local_addrs(),
                    LOCAL_SOURCE,
                ) {
                    out.push(peer);
                }
            }
        }
        out
    }

    fn realm_of_key(&self, key: &str) -> RealmId {
        // `dep2p/v1/realm/<realm>/<ns>` carries its realm in the third
        // segment; anything else is system-scoped.
        let mut segments = key.split('/').skip(2);
        match (segments.next(), segments.next()) {
            (Some("realm"), Some(realm)) => RealmId::new(realm).unwrap_or_default(),
            _ => RealmId::default(),
        }
    }

    // --------------------------------------------
    // ---------- Service registration ------------
    // --------------------------------------------

    /// Registers a service under every requested source and schedules its
    /// renewal.
    pub async fn register_service(self: &Arc<Self>, registration: ServiceRegistration) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Closed);
        }
        let resolved = self.resolve_scope(
            &registration.namespace,
            registration.scope,
            &registration.realm_id,
        );
        let ttl = if registration.ttl.is_zero() {
            self.config.rendezvous_default_ttl
        } else {
            registration.ttl.min(self.config.rendezvous_max_ttl)
        };

        self.announce_registration(&resolved.full_key, &registration.sources, ttl)
            .await?;

        let now = self.clock.instant();
        let record = ActiveRegistration {
            namespace: resolved.namespace.clone(),
            full_key: resolved.full_key.clone(),
            sources: registration.sources.clone(),
            ttl,
            registered_at: now,
            expires_at: now + ttl,
        };
        let _ = self
            .state
            .write()
            .expect("coordinator state lock")
            .active_registrations
            .insert(resolved.full_key, record);
        Ok(())
    }

    /// Withdraws a service registration. Provider announces simply age out;
    /// rendezvous entries are deleted remotely.
    pub async fn unregister_service(
        self: &Arc<Self>,
        namespace: &str,
        scope: Scope,
        realm: &RealmId,
    ) -> Result<()> {
        let resolved = self.resolve_scope(namespace, scope, realm);
        let removed = self
            .state
            .write()
            .expect("coordinator state lock")
            .active_registrations
            .remove(&resolved.full_key);

        for backend in self.backends_snapshot() {
            if let Some(ns) = backend.as_namespace_discoverer() {
                if let Err(err) = ns.unregister_namespace(&resolved.full_key).await {
                    warn!(
                        "Unregister of {} at {} failed: {err}",
                        resolved.full_key,
                        backend.name()
                    );
                }
            }
            if let Some(announcer) = backend.as_announcer() {
                let _ = announcer.stop_announce(&resolved.full_key).await;
            }
        }
        if removed.is_none() {
            trace!("Unregister of unknown service {}", resolved.full_key);
        }
        Ok(())
    }

    async fn announce_registration(
        self: &Arc<Self>,
        full_key: &str,
        sources: &[DiscoverySource],
        ttl: Duration,
    ) -> Result<()> {
        let record = self.local_record()?;
        for source in sources {
            match source {
                DiscoverySource::Provider => {
                    // The fallback announce goes through the first announcer
                    // in registration order, deterministically.
                    for backend in self.backends_snapshot() {
                        let Some(announcer) = backend.as_announcer() else {
                            continue;
                        };
                        if let Err(err) = announcer.announce(full_key, &record, ttl).await {
                            warn!("Announce via {} failed: {err}", backend.name());
                        }
                        break;
                    }
                }
                DiscoverySource::Rendezvous => {
                    for backend in self.backends_snapshot() {
                        let Some(ns) = backend.as_namespace_discoverer() else {
                            continue;
                        };
                        if let Err(err) = ns.register_namespace(full_key, ttl).await {
                            warn!(
                                "Rendezvous registration via {} failed: {err}",
                                backend.name()
                            );
                        }
                    }
                }
                DiscoverySource::Local => {}
            }
        }
        Ok(())
    }

    fn local_record(&self) -> Result<Vec<u8>> {
        let Some(endpoint) = self.endpoint_snapshot() else {
            return Ok(Vec::new());
        };
        let info = PeerInfo::new(endpoint.local_node(), endpoint.local_addrs(), LOCAL_SOURCE)?;
        rmp_serde::to_vec(&info).map_err(|err| DiscoveryError::RecordEncoding(err.to_string()))
    }

    // --------------------------------------------
    // ---------- FindPeer ladder -----------------
    // --------------------------------------------

    /// Resolves a NodeId to addresses, walking: known peers, the address
    /// book, live connections, then a parallel network query.
    pub async fn find_peer(self: &Arc<Self>, id: &NodeId) -> Result<PeerInfo> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Closed);
        }

        // Recursion guard: a lookup of `id` nested under a lookup of `id`
        // (DHT -> dial -> discovery) fails fast instead of deadlocking.
        let already = RESOLVING
            .try_with(|set| set.borrow().contains(id))
            .unwrap_or(false);
        if already {
            return Err(DiscoveryError::RecursiveDiscovery(id.clone()));
        }

        let mut set = RESOLVING
            .try_with(|set| set.borrow().clone())
            .unwrap_or_default();
        let _ = set.insert(id.clone());

        let this = Arc::clone(self);
        let id = id.clone();
        RESOLVING
            .scope(RefCell::new(set), async move {
                let deadline = this.config.find_peer_timeout;
                match tokio::time::timeout(deadline, this.find_peer_inner(&id)).await {
                    Ok(result) => result,
                    // Dropping the inner future dropped its waiter guard, so
                    // only this call's pending-lookup entry went away.
                    Err(_) => Err(DiscoveryError::PeerLookupTimeout(id)),
                }
            })
            .await
    }

    async fn find_peer_inner(self: &Arc<Self>, id: &NodeId) -> Result<PeerInfo> {
        // 1. The realm-filtered cache.
        if let Some(known) = self
            .state
            .read()
            .expect("coordinator state lock")
            .known_peers
            .get(id)
        {
            return Ok(known.info.clone());
        }

        // 2. The external address book.
        if let Some(book) = self.address_book.read().expect("address book lock").clone() {
            let addrs = book.addrs_of(id);
            if !addrs.is_empty() {
                return Ok(PeerInfo::new(id.clone(), addrs, ADDRESS_BOOK_SOURCE)?);
            }
        }

        // 3. Addresses observed on a live connection.
        if let Some(endpoint) = self.endpoint_snapshot() {
            let addrs = endpoint.remote_addrs(id);
            if !addrs.is_empty() {
                return Ok(PeerInfo::new(id.clone(), addrs, CONNECTION_SOURCE)?);
            }
        }

        // 4. The network: every finder and discoverer in parallel, first
        // admission wins via the pending-lookup channel.
        let (tx, rx) = oneshot::channel();
        let token = self.lookup_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut lookups = self.lookups.lock().expect("lookup lock");
            let _ = lookups.entry(id.clone()).or_default().insert(token, tx);
        }
        let _waiter = LookupGuard {
            coordinator: self.as_ref(),
            id: id.clone(),
            token,
        };

        let realm = self.current_realm();
        // The in-progress set travels into the backend tasks so a nested
        // lookup of the same id still trips the guard.
        let resolving = RESOLVING
            .try_with(|set| set.borrow().clone())
            .unwrap_or_default();
        for backend in self.backends_snapshot() {
            let this = Arc::clone(self);
            let id = id.clone();
            let realm = realm.clone();
            let backend = Arc::clone(&backend);
            let resolving = resolving.clone();
            let _handle = tokio::spawn(RESOLVING.scope(RefCell::new(resolving), async move {
                if let Some(finder) = backend.as_peer_finder() {
                    match finder.find_peer(&id).await {
                        Ok(Some(peer)) => {
                            let _ = this.admit_peer(peer, realm.clone());
                        }
                        Ok(None) => {}
                        Err(err) => {
                            debug!("Peer finder {} failed for {id:?}: {err}", backend.name())
                        }
                    }
                }
                if let Some(discoverer) = backend.as_discoverer() {
                    let key = sys_namespace_key(NS_BOOTSTRAP);
                    if let Ok(peers) = discoverer.discover(&key, 0).await {
                        for peer in peers {
                            let _ = this.admit_peer(peer, realm.clone());
                        }
                    }
                }
            }));
        }

        match rx.await {
            Ok(peer) => Ok(peer),
            Err(_) => Err(DiscoveryError::LookupCancelled(id.clone())),
        }
    }

    fn remove_lookup_waiter(&self, id: &NodeId, token: u64) {
        let mut lookups = self.lookups.lock().expect("lookup lock");
        if let Some(waiters) = lookups.get_mut(id) {
            let _ = waiters.remove(&token);
            if waiters.is_empty() {
                let _ = lookups.remove(id);
            }
        }
    }

    // --------------------------------------------
    // ---------- Closest peers -------------------
    // --------------------------------------------

    /// The `count` known peers nearest to the realm-aware key for `key`,
    /// ascending by XOR distance with lexical NodeId tie-break.
    pub fn find_closest_peers(&self, key: &[u8], count: usize) -> Vec<NodeId> {
        if count == 0 {
            return Vec::new();
        }
        let realm = self.current_realm();
        let target = realm_aware_key(&realm, &to_key_bytes(key));

        let state = self.state.read().expect("coordinator state lock");
        let mut candidates: Vec<(dep2p_protocol::XorDistance, NodeId)> = state
            .known_peers
            .keys()
            .map(|id| (xor_distance(id.as_bytes(), &target), id.clone()))
            .collect();
        drop(state);

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        candidates.truncate(count);
        candidates.into_iter().map(|(_, id)| id).collect()
    }

    // --------------------------------------------
    // ---------- Peer admission ------------------
    // --------------------------------------------

    /// Realm-filters and records a discovered peer, waking pending lookups.
    /// Returns whether the peer was admitted.
    pub fn admit_peer(&self, peer: PeerInfo, peer_realm: RealmId) -> bool {
        {
            let mut state = self.state.write().expect("coordinator state lock");
            if !Self::realm_admits(&state, &peer_realm, &peer.id) {
                trace!("Realm filter dropped {:?}", peer.id);
                return false;
            }
            let _ = state.known_peers.insert(
                peer.id.clone(),
                KnownPeer {
                    info: peer.clone(),
                    realm_id: peer_realm,
                    last_seen: self.clock.now(),
                },
            );
        }

        // `state` is released before the lookup lock is taken.
        let waiters = self
            .lookups
            .lock()
            .expect("lookup lock")
            .remove(&peer.id)
            .unwrap_or_default();
        for (_, waiter) in waiters {
            let _ = waiter.send(peer.clone());
        }
        true
    }

    fn realm_admits(state: &State, peer_realm: &RealmId, peer_id: &NodeId) -> bool {
        match state.access_level {
            AccessLevel::Public => true,
            // Private realms admit members of the same realm only; everyone
            // else is dropped without an announce.
            AccessLevel::Private => {
                *peer_realm == state.current_realm && state.members.contains(peer_id)
            }
        }
    }

    pub fn remove_known_peer(&self, id: &NodeId) {
        let _ = self
            .state
            .write()
            .expect("coordinator state lock")
            .known_peers
            .remove(id);
    }

    pub fn known_peer_count(&self) -> usize {
        self.state
            .read()
            .expect("coordinator state lock")
            .known_peers
            .len()
    }

    // --------------------------------------------
    // ---------- Background rounds ---------------
    // --------------------------------------------

    async fn discovery_round(self: &Arc<Self>) {
        let realm = self.current_realm();
        let key = if realm.is_default() {
            sys_namespace_key(NS_BOOTSTRAP)
        } else {
            realm_namespace_key(&realm, NS_BOOTSTRAP)
        };

        let mut admitted = 0usize;
        let mut failed = false;
        for backend in self.backends_snapshot() {
            let Some(discoverer) = backend.as_discoverer() else {
                continue;
            };
            match discoverer.discover(&key, 0).await {
                Ok(peers) => {
                    for peer in peers {
                        if self.admit_peer(peer, realm.clone()) {
                            admitted += 1;
                        }
                    }
                }
                Err(err) => {
                    debug!("Discovery round via {} failed: {err}", backend.name());
                    failed = true;
                }
            }
        }

        let recovering = {
            let mut interval = self.interval.lock().expect("interval lock");
            if failed && admitted == 0 {
                interval.record_failure();
            } else {
                interval.record_success();
            }
            interval.is_recovering()
        };

        if recovering {
            self.emergency_round().await;
        }
    }

    /// Emergency recovery: reconnect the full bootstrap list in parallel and
    /// fire aggressive closest-peer queries.
    async fn emergency_round(self: &Arc<Self>) {
        warn!("Running emergency discovery round");
        let bootstrap = self.bootstrap.read().expect("bootstrap ref lock").clone();
        if let Some(bootstrap) = bootstrap {
            bootstrap.connect_all_parallel().await;
        }

        let local_key: [u8; 32] = match self.endpoint_snapshot() {
            Some(endpoint) => *endpoint.local_node().as_bytes(),
            None => [0u8; 32],
        };
        let realm = self.current_realm();
        for backend in self.backends_snapshot() {
            let Some(finder) = backend.as_closest_peer_finder() else {
                continue;
            };
            match finder.closest_peers(&local_key, 20).await {
                Ok(peers) => {
                    for peer in peers {
                        let _ = self.admit_peer(peer, realm.clone());
                    }
                }
                Err(err) => debug!(
                    "Aggressive closest-peer query via {} failed: {err}",
                    backend.name()
                ),
            }
        }
    }

    /// Refreshes the local PeerRecord announce; explicit service providers
    /// renew through the renewal loop instead.
    async fn announce_round(self: &Arc<Self>) {
        let realm = self.current_realm();
        // A realm member announces under its realm key only; the default
        // realm announces system-wide.
        let key = if realm.is_default() {
            sys_namespace_key(NS_BOOTSTRAP)
        } else {
            realm_namespace_key(&realm, NS_BOOTSTRAP)
        };

        let record = match self.local_record() {
            Ok(record) if !record.is_empty() => record,
            _ => return,
        };
        let ttl = self.config.rendezvous_default_ttl;
        for backend in self.backends_snapshot() {
            let Some(announcer) = backend.as_announcer() else {
                continue;
            };
            if let Err(err) = announcer.announce(&key, &record, ttl).await {
                debug!("Announce refresh via {} failed: {err}", backend.name());
            }
        }
    }

    fn cleanup_round(&self) {
        let cutoff = self.clock.now() - self.config.max_peer_idle;
        let mut state = self.state.write().expect("coordinator state lock");
        let before = state.known_peers.len();
        state.known_peers.retain(|_, known| known.last_seen >= cutoff);
        let removed = before - state.known_peers.len();
        if removed > 0 {
            debug!("Cleanup dropped {removed} idle peers");
        }
    }

    async fn renewal_round(self: &Arc<Self>) {
        let now = self.clock.instant();
        let due: Vec<ActiveRegistration> = {
            let state = self.state.read().expect("coordinator state lock");
            state
                .active_registrations
                .values()
                .filter(|reg| reg.needs_renewal(now))
                .cloned()
                .collect()
        };

        for registration in due {
            debug!("Renewing service registration {}", registration.full_key);
            if let Err(err) = self
                .announce_registration(
                    &registration.full_key,
                    &registration.sources,
                    registration.ttl,
                )
                .await
            {
                warn!("Renewal of {} failed: {err}", registration.full_key);
                continue;
            }
            let mut state = self.state.write().expect("coordinator state lock");
            if let Some(entry) = state.active_registrations.get_mut(&registration.full_key) {
                entry.touch(self.clock.instant());
            }
        }
    }

    // --------------------------------------------
    // ---------- Snapshots -----------------------
    // --------------------------------------------

    fn backends_snapshot(&self) -> Vec<Arc<dyn DiscoveryBackend>> {
        self.state
            .read()
            .expect("coordinator state lock")
            .backends
            .clone()
    }

    fn endpoint_snapshot(&self) -> Option<Arc<dyn Endpoint>> {
        self.endpoint.read().expect("endpoint lock").clone()
    }
}
