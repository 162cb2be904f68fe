// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! LRU + TTL route cache. A hit is always live: expired entries are evicted
//! on access, so `get` never returns a stale route.

use crate::types::Route;
use dep2p_protocol::NodeId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Routes kept before LRU eviction.
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;
/// Lifetime of a cached route.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CachedRoute {
    route: Route,
    expires_at: Instant,
}

/// Bounded cache of established routes, keyed by target.
pub struct RouteCache {
    entries: Mutex<LruCache<NodeId, CachedRoute>>,
    ttl: Duration,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Caches a route under its target, with the default TTL.
    pub fn set(&self, route: Route) {
        self.set_with_ttl(route, self.ttl);
    }

    pub fn set_with_ttl(&self, route: Route, ttl: Duration) {
        let mut entries = self.entries.lock().expect("route cache lock");
        let _ = entries.put(
            route.target.clone(),
            CachedRoute {
                route,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// A live cached route for `target`, bumping its recency. Expired
    /// entries are evicted and reported as a miss.
    pub fn get(&self, target: &NodeId) -> Option<Route> {
        let mut entries = self.entries.lock().expect("route cache lock");
        match entries.get(target) {
            Some(cached) if cached.expires_at > Instant::now() => Some(cached.route.clone()),
            Some(_) => {
                let _ = entries.pop(target);
                None
            }
            None => None,
        }
    }

    pub fn invalidate(&self, target: &NodeId) {
        let _ = self
            .entries
            .lock()
            .expect("route cache lock")
            .pop(target);
    }

    /// Evicts every expired entry. Returns the count removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("route cache lock");
        let expired: Vec<NodeId> = entries
            .iter()
            .filter(|(_, cached)| cached.expires_at <= now)
            .map(|(target, _)| target.clone())
            .collect();
        for target in &expired {
            let _ = entries.pop(target);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("route cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}
