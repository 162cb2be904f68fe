// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The per-realm gateway.
//!
//! Accepts relay requests for its own realm only: protocol gate, proof
//! verification, a pooled outbound stream, then bidirectional forwarding
//! under the bandwidth limiter. The router side is informed through a
//! one-way state callback and the [`GatewayRouteAdapter`].

use crate::auth::RealmAuthenticator;
use crate::error::{GatewayError, Result};
use crate::limiter::{BandwidthLimiter, DEFAULT_BURST_CAPACITY, DEFAULT_RATE_BPS};
use crate::pool::{ConnectionPool, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_IDLE};
use crate::relay::{RelayService, RelaySession};
use crate::validator::ProtocolValidator;
use dep2p_protocol::endpoint::{BoxStream, Endpoint};
use dep2p_protocol::messages::auth::{write_auth_frame, AuthResult};
use dep2p_protocol::{NodeId, RealmId};
use dep2p_routing::pathfinder::DEFAULT_EDGE_LATENCY;
use dep2p_routing::{RelayRouteProvider, Route};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Concurrent relay streams.
    pub max_concurrent: usize,
    /// Idle pooled streams older than this are swept.
    pub max_idle: Duration,
    /// Sweep cadence for the pool and session registry.
    pub cleanup_interval: Duration,
    /// Bandwidth budget.
    pub rate_bps: u64,
    pub burst_capacity: u64,
    /// Optional hard bound on a single relay session.
    pub max_relay_duration: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_idle: DEFAULT_MAX_IDLE,
            cleanup_interval: Duration::from_secs(5 * 60),
            rate_bps: DEFAULT_RATE_BPS,
            burst_capacity: DEFAULT_BURST_CAPACITY,
            max_relay_duration: None,
        }
    }
}

/// A parsed relay request, as handed over by the host's stream handler.
#[derive(Clone, Debug)]
pub struct RelayRequest {
    pub source: NodeId,
    pub target: NodeId,
    pub protocol: String,
    pub auth_proof: Vec<u8>,
}

/// Load snapshot pushed to the router side.
#[derive(Clone, Debug)]
pub struct GatewayState {
    pub realm: RealmId,
    pub active_sessions: usize,
    pub leased_streams: usize,
}

type StateCallback = Box<dyn Fn(GatewayState) + Send + Sync>;

/// Relay forwarder for one realm.
pub struct Gateway {
    config: GatewayConfig,
    validator: ProtocolValidator,
    authenticator: Arc<RealmAuthenticator>,
    pool: ConnectionPool,
    relay: RelayService,
    state_callback: RwLock<Option<StateCallback>>,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        authenticator: Arc<RealmAuthenticator>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Arc<Self> {
        let limiter = Arc::new(BandwidthLimiter::with_limits(
            config.rate_bps,
            config.burst_capacity,
        ));
        Arc::new(Self {
            validator: ProtocolValidator::new(authenticator.realm_id().clone()),
            pool: ConnectionPool::with_limits(endpoint, config.max_concurrent),
            relay: RelayService::new(limiter, config.max_relay_duration),
            authenticator,
            config,
            state_callback: RwLock::new(None),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        })
    }

    /// The realm this gateway serves.
    pub fn realm_id(&self) -> &RealmId {
        self.validator.realm()
    }

    /// One-way notification channel towards the router; nothing is read
    /// back.
    pub fn set_state_callback(&self, callback: StateCallback) {
        *self.state_callback.write().expect("state callback lock") = Some(callback);
    }

    /// Executes a relay: gate, authenticate, pair with an outbound stream,
    /// confirm, forward until either side closes.
    pub async fn relay(
        &self,
        request: RelayRequest,
        mut inbound: BoxStream,
    ) -> Result<Arc<RelaySession>> {
        self.validator.validate(&request.protocol)?;

        let _ = self
            .authenticator
            .authenticate(request.source.as_bytes(), &request.auth_proof)
            .map_err(|err| {
                debug!("Relay auth failed for {:?}: {err}", request.source);
                err
            })?;

        let lease = self.pool.acquire(&request.target).await?;
        let (outbound, _slot) = lease.into_parts();

        // The requester learns the relay is live before any bytes flow.
        let accepted = AuthResult {
            success: true,
            error: String::new(),
        };
        write_auth_frame(&mut inbound, &accepted.encode()).await?;

        let session = self.relay.open_session(
            request.source.clone(),
            request.target.clone(),
            request.protocol.clone(),
        );
        info!(
            "Relay session {} for {:?} -> {:?} ({})",
            session.id, request.source, request.target, request.protocol
        );
        self.report_state();

        let outcome = self.relay.transfer(&session, inbound, outbound).await;
        self.report_state();
        match outcome {
            Ok(()) => Ok(session),
            Err(err) => {
                debug!("Relay session {} ended with error: {err}", session.id);
                Err(err)
            }
        }
    }

    /// Sends an error result on the inbound stream; used by hosts when
    /// [`Gateway::relay`] refuses a request.
    pub async fn reject(&self, inbound: &mut BoxStream, err: &GatewayError) -> Result<()> {
        let result = AuthResult {
            success: false,
            error: err.to_string(),
        };
        write_auth_frame(inbound, &result.encode()).await?;
        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        self.relay.active_sessions()
    }

    pub fn session(&self, id: u64) -> Option<Arc<RelaySession>> {
        self.relay.session(id)
    }

    /// Starts the pool/session sweep loop. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().expect("gateway shutdown lock") = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.config.cleanup_interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let idle = this.pool.cleanup_idle(this.config.max_idle);
                        let closed = this.relay.prune_closed();
                        if idle + closed > 0 {
                            debug!("Gateway sweep: {idle} idle streams, {closed} closed sessions");
                        }
                        this.report_state();
                    }
                    _ = rx.changed() => return,
                }
            }
        });
        Ok(())
    }

    /// Stops the sweep loop and closes the authenticator. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.lock().expect("gateway shutdown lock").take() {
            let _ = tx.send(true);
        }
        self.authenticator.close();
        Ok(())
    }

    fn report_state(&self) {
        let callback = self.state_callback.read().expect("state callback lock");
        if let Some(callback) = callback.as_ref() {
            callback(GatewayState {
                realm: self.realm_id().clone(),
                active_sessions: self.relay.active_sessions(),
                leased_streams: self.pool.leased_count(),
            });
        }
    }
}

/// Router-facing relay fallback: offers two-hop routes through a known
/// relay peer for targets the table cannot reach.
pub struct GatewayRouteAdapter {
    local: NodeId,
    relay_peers: RwLock<Vec<NodeId>>,
}

impl GatewayRouteAdapter {
    pub fn new(local: NodeId) -> Arc<Self> {
        Arc::new(Self {
            local,
            relay_peers: RwLock::new(Vec::new()),
        })
    }

    /// Replaces the relay peer set, typically from discovery of the realm's
    /// relay namespace.
    pub fn set_relay_peers(&self, peers: Vec<NodeId>) {
        *self.relay_peers.write().expect("relay peers lock") = peers;
    }
}

impl RelayRouteProvider for GatewayRouteAdapter {
    fn relay_route(&self, target: &NodeId) -> Option<Route> {
        let peers = self.relay_peers.read().expect("relay peers lock");
        let relay = peers.first()?.clone();
        drop(peers);
        if relay == *target {
            return None;
        }
        Some(Route {
            target: target.clone(),
            next_hop: relay.clone(),
            path: vec![self.local.clone(), relay, target.clone()],
            // Two hops, neither measured yet.
            latency: DEFAULT_EDGE_LATENCY * 2,
            hops: 2,
            score: 0.0,
            created_at: Instant::now(),
        })
    }
}
