// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Route establishment and selection.
//!
//! `find_route` walks cache -> direct neighbor -> shortest path -> relay
//! fallback; `select_best_route` ranks candidates under a policy. A refresh
//! loop expires table entries and cached routes.

use crate::balancer::LoadBalancer;
use crate::cache::RouteCache;
use crate::error::{Result, RoutingError};
use crate::pathfinder::{PathFinder, DEFAULT_EDGE_LATENCY};
use crate::table::RouteTable;
use crate::types::{Path, Route, RoutePolicy};
use dep2p_protocol::NodeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Cadence of the table/cache refresh loop.
pub const DEFAULT_TABLE_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Supplies relay-mediated routes for targets the table cannot reach.
/// One-way: the router asks, the gateway answers; nothing flows back.
pub trait RelayRouteProvider: Send + Sync {
    fn relay_route(&self, target: &NodeId) -> Option<Route>;
}

/// Realm router over a shared route table.
pub struct Router {
    table: Arc<RouteTable>,
    pathfinder: PathFinder,
    balancer: Arc<LoadBalancer>,
    cache: RouteCache,
    relay_provider: RwLock<Option<Arc<dyn RelayRouteProvider>>>,
    refresh_interval: Duration,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl Router {
    pub fn new(table: Arc<RouteTable>, balancer: Arc<LoadBalancer>) -> Arc<Self> {
        Arc::new(Self {
            pathfinder: PathFinder::new(Arc::clone(&table)),
            table,
            balancer,
            cache: RouteCache::new(),
            relay_provider: RwLock::new(None),
            refresh_interval: DEFAULT_TABLE_REFRESH_INTERVAL,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        })
    }

    /// Wires the gateway-side relay fallback.
    pub fn set_relay_provider(&self, provider: Arc<dyn RelayRouteProvider>) {
        *self
            .relay_provider
            .write()
            .expect("relay provider lock") = Some(provider);
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Establishes a route to `target`: cached route, direct neighbor,
    /// computed path, then relay fallback, in that order. Successes are
    /// cached.
    pub fn find_route(&self, target: &NodeId) -> Result<Route> {
        if let Some(route) = self.cache.get(target) {
            trace!("Route cache hit for {target:?}");
            return Ok(route);
        }

        if let Some(node) = self.table.get_node(target) {
            if node.is_reachable {
                let latency = if node.latency.is_zero() {
                    DEFAULT_EDGE_LATENCY
                } else {
                    node.latency
                };
                let route = Route {
                    target: target.clone(),
                    next_hop: target.clone(),
                    path: vec![self.table.local_node().clone(), target.clone()],
                    latency,
                    hops: 1,
                    score: 0.0,
                    created_at: Instant::now(),
                };
                self.cache.set(route.clone());
                return Ok(route);
            }
        }

        let local = self.table.local_node().clone();
        match self.pathfinder.find_shortest_path(&local, target) {
            Ok(path) => {
                let route = self.route_from_path(target, &path)?;
                self.cache.set(route.clone());
                return Ok(route);
            }
            Err(err) => debug!("No computed path to {target:?}: {err}"),
        }

        let provider = self
            .relay_provider
            .read()
            .expect("relay provider lock")
            .clone();
        if let Some(provider) = provider {
            if let Some(route) = provider.relay_route(target) {
                self.cache.set(route.clone());
                return Ok(route);
            }
        }

        Err(RoutingError::RouteNotFound(target.clone()))
    }

    /// Up to `k` alternative routes, shortest first.
    pub fn find_routes(&self, target: &NodeId, k: usize) -> Result<Vec<Route>> {
        let local = self.table.local_node().clone();
        let paths = self.pathfinder.find_multiple_paths(&local, target, k)?;
        paths
            .iter()
            .map(|path| self.route_from_path(target, path))
            .collect()
    }

    /// Ranks candidate routes under `policy` and returns the winner.
    pub fn select_best_route(&self, routes: &[Route], policy: RoutePolicy) -> Result<Route> {
        if routes.is_empty() {
            return Err(RoutingError::NoViablePath);
        }
        let chosen = match policy {
            RoutePolicy::LowestLatency => routes
                .iter()
                .min_by_key(|route| route.latency)
                .ok_or(RoutingError::NoViablePath)?,
            RoutePolicy::LeastHops => routes
                .iter()
                .min_by_key(|route| route.hops)
                .ok_or(RoutingError::NoViablePath)?,
            RoutePolicy::LoadBalance => {
                let hops: Vec<NodeId> =
                    routes.iter().map(|route| route.next_hop.clone()).collect();
                let winner = self.balancer.select(&hops)?;
                routes
                    .iter()
                    .find(|route| route.next_hop == winner)
                    .ok_or(RoutingError::NoViablePath)?
            }
            RoutePolicy::Mixed => routes
                .iter()
                .max_by(|a, b| self.mixed_score(a).total_cmp(&self.mixed_score(b)))
                .ok_or(RoutingError::NoViablePath)?,
        };
        Ok(chosen.clone())
    }

    /// `0.5*latency + 0.3*hops + 0.2*load`, each term monotonically
    /// non-increasing in its input so a higher score is always better.
    fn mixed_score(&self, route: &Route) -> f64 {
        let latency_score = 1.0 / (1.0 + route.latency.as_millis() as f64 / 100.0);
        let hops_score = 1.0 / route.hops.max(1) as f64;
        let load_score = 1.0 / (1.0 + self.balancer.score(&route.next_hop));
        0.5 * latency_score + 0.3 * hops_score + 0.2 * load_score
    }

    /// Starts the refresh loop. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().expect("router shutdown lock") = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.refresh_interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let expired_nodes = this.table.cleanup_expired();
                        let expired_routes = this.cache.purge_expired();
                        if expired_nodes + expired_routes > 0 {
                            debug!(
                                "Refresh dropped {expired_nodes} nodes and {expired_routes} routes"
                            );
                        }
                    }
                    _ = rx.changed() => return,
                }
            }
        });
        Ok(())
    }

    /// Stops the refresh loop. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.lock().expect("router shutdown lock").take() {
            let _ = tx.send(true);
        }
        Ok(())
    }

    fn route_from_path(&self, target: &NodeId, path: &Path) -> Result<Route> {
        if !path.valid || path.nodes.len() < 2 {
            return Err(RoutingError::PathNotFound {
                from: self.table.local_node().clone(),
                to: target.clone(),
            });
        }
        Ok(Route {
            target: target.clone(),
            next_hop: path.nodes[1].clone(),
            path: path.nodes.clone(),
            latency: path.total_latency,
            hops: path.hops,
            score: 0.0,
            created_at: Instant::now(),
        })
    }
}
