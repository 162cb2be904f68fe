// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Capability interfaces implemented by discovery backends.
//!
//! A backend object (bootstrap list, DNS resolver, rendezvous client, an
//! externally wired DHT or mDNS responder) advertises each capability it
//! supports through [`DiscoveryBackend`]; the coordinator queries those
//! capabilities explicitly at registration time and never downcasts.

use crate::error::Result;
use crate::types::DiscoverySource;
use async_trait::async_trait;
use dep2p_protocol::{NodeId, PeerInfo};
use std::time::Duration;

/// Discovers peers under a resolved namespace key.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// The source tag this backend's results carry in the priority merge.
    fn source(&self) -> DiscoverySource;

    /// Returns up to `limit` peers for `key`; zero means no bound.
    async fn discover(&self, key: &str, limit: usize) -> Result<Vec<PeerInfo>>;
}

/// Announces the local peer record under a resolved namespace key.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, key: &str, record: &[u8], ttl: Duration) -> Result<()>;

    /// Withdraws an announce. Backends that only age records out may treat
    /// this as a no-op.
    async fn stop_announce(&self, key: &str) -> Result<()>;
}

/// Resolves a single NodeId to addresses.
#[async_trait]
pub trait PeerFinder: Send + Sync {
    async fn find_peer(&self, node: &NodeId) -> Result<Option<PeerInfo>>;
}

/// Returns peers nearest to a DHT key in XOR space.
#[async_trait]
pub trait ClosestPeerFinder: Send + Sync {
    async fn closest_peers(&self, key: &[u8; 32], count: usize) -> Result<Vec<PeerInfo>>;
}

/// Registers and discovers namespace memberships (rendezvous-shaped).
#[async_trait]
pub trait NamespaceDiscoverer: Send + Sync {
    async fn discover_namespace(&self, key: &str, limit: usize) -> Result<Vec<PeerInfo>>;

    /// Registers the local node under `key`. Returns the granted TTL, which
    /// may be shorter than requested.
    async fn register_namespace(&self, key: &str, ttl: Duration) -> Result<Duration>;

    async fn unregister_namespace(&self, key: &str) -> Result<()>;
}

/// Umbrella trait every backend implements; the `as_*` accessors are the
/// explicit capability queries.
pub trait DiscoveryBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        None
    }

    fn as_announcer(&self) -> Option<&dyn Announcer> {
        None
    }

    fn as_peer_finder(&self) -> Option<&dyn PeerFinder> {
        None
    }

    fn as_closest_peer_finder(&self) -> Option<&dyn ClosestPeerFinder> {
        None
    }

    fn as_namespace_discoverer(&self) -> Option<&dyn NamespaceDiscoverer> {
        None
    }
}

/// Fetches the peers a freshly connected node is willing to share.
#[async_trait]
pub trait PeerGossip: Send + Sync {
    async fn fetch_peers(&self, node: &NodeId) -> Result<Vec<PeerInfo>>;
}
