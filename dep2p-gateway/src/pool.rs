// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Pooled relay streams.
//!
//! One idle stream per target peer is kept for reuse with LRU recency; the
//! number of leased streams is capped, and idle entries beyond the idle
//! window are swept out.

use crate::error::{GatewayError, Result};
use dep2p_protocol::endpoint::{BoxStream, Endpoint};
use dep2p_protocol::version::GATEWAY_RELAY_PROTOCOL;
use dep2p_protocol::NodeId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Concurrent leased streams.
pub const DEFAULT_MAX_CONCURRENT: usize = 1_000;
/// Idle entries older than this are swept.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);

struct IdleEntry {
    stream: BoxStream,
    last_used: Instant,
    use_count: u64,
}

/// Holds one concurrency slot; the slot frees itself when the guard drops.
pub struct LeaseGuard {
    leased: Arc<AtomicUsize>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let _ = self.leased.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A stream leased from the pool. Hand it back with [`ConnectionPool::release`]
/// if it is still usable, or drop it (via [`ConnectionPool::discard`]) when
/// it is spent.
pub struct PooledStream {
    pub peer: NodeId,
    pub stream: BoxStream,
    pub reused: bool,
    use_count: u64,
    guard: LeaseGuard,
}

impl PooledStream {
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    /// Splits the lease so the stream can be consumed while the concurrency
    /// slot stays held until the guard drops.
    pub fn into_parts(self) -> (BoxStream, LeaseGuard) {
        (self.stream, self.guard)
    }
}

/// Relay stream pool over the transport endpoint.
pub struct ConnectionPool {
    endpoint: Arc<dyn Endpoint>,
    max_concurrent: usize,
    idle: Mutex<LruCache<NodeId, IdleEntry>>,
    leased: Arc<AtomicUsize>,
}

impl ConnectionPool {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self::with_limits(endpoint, DEFAULT_MAX_CONCURRENT)
    }

    pub fn with_limits(endpoint: Arc<dyn Endpoint>, max_concurrent: usize) -> Self {
        let capacity =
            NonZeroUsize::new(max_concurrent.max(1)).expect("capacity is at least one");
        Self {
            endpoint,
            max_concurrent,
            idle: Mutex::new(LruCache::new(capacity)),
            leased: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Leases a stream to `peer`, reusing the idle one when present and
    /// opening a fresh relay stream otherwise.
    pub async fn acquire(&self, peer: &NodeId) -> Result<PooledStream> {
        // Reserve the slot first so racing acquires cannot overshoot the cap.
        let previous = self.leased.fetch_add(1, Ordering::SeqCst);
        if previous >= self.max_concurrent {
            let _ = self.leased.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::PoolExhausted(self.max_concurrent));
        }
        let guard = LeaseGuard {
            leased: Arc::clone(&self.leased),
        };

        if let Some(entry) = self.take_idle(peer) {
            return Ok(PooledStream {
                peer: peer.clone(),
                stream: entry.stream,
                reused: true,
                use_count: entry.use_count + 1,
                guard,
            });
        }

        let stream = self
            .endpoint
            .open_stream(peer, GATEWAY_RELAY_PROTOCOL)
            .await?;
        Ok(PooledStream {
            peer: peer.clone(),
            stream,
            reused: false,
            use_count: 1,
            guard,
        })
    }

    /// Returns a still-usable stream to the idle set.
    pub fn release(&self, lease: PooledStream) {
        let mut idle = self.idle.lock().expect("pool idle lock");
        let _ = idle.put(
            lease.peer.clone(),
            IdleEntry {
                stream: lease.stream,
                last_used: Instant::now(),
                use_count: lease.use_count,
            },
        );
        // The remaining lease fields drop here, freeing the slot.
    }

    /// Drops a dead stream, freeing its concurrency slot.
    pub fn discard(&self, lease: PooledStream) {
        drop(lease);
    }

    /// Sweeps idle entries unused for longer than `max_idle`. Returns the
    /// count removed.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Instant::now() - max_idle;
        let mut idle = self.idle.lock().expect("pool idle lock");
        let stale: Vec<NodeId> = idle
            .iter()
            .filter(|(_, entry)| entry.last_used < cutoff)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &stale {
            let _ = idle.pop(peer);
        }
        stale.len()
    }

    pub fn leased_count(&self) -> usize {
        self.leased.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool idle lock").len()
    }

    fn take_idle(&self, peer: &NodeId) -> Option<IdleEntry> {
        self.idle.lock().expect("pool idle lock").pop(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dep2p_protocol::Multiaddr;
    use std::io;

    struct DuplexEndpoint {
        local: NodeId,
    }

    #[async_trait]
    impl Endpoint for DuplexEndpoint {
        fn local_node(&self) -> NodeId {
            self.local.clone()
        }

        fn local_addrs(&self) -> Vec<Multiaddr> {
            Vec::new()
        }

        async fn open_stream(&self, _node: &NodeId, protocol: &str) -> io::Result<BoxStream> {
            assert_eq!(protocol, GATEWAY_RELAY_PROTOCOL);
            let (client, _server) = tokio::io::duplex(1024);
            Ok(Box::new(client))
        }

        async fn dial(&self, _node: &NodeId, _addrs: &[Multiaddr]) -> io::Result<()> {
            Ok(())
        }

        fn connected_nodes(&self) -> Vec<NodeId> {
            Vec::new()
        }

        fn remote_addrs(&self, _node: &NodeId) -> Vec<Multiaddr> {
            Vec::new()
        }
    }

    fn node_id(n: u8) -> NodeId {
        NodeId::from_bytes(&[n; 32]).unwrap()
    }

    fn pool(max: usize) -> ConnectionPool {
        ConnectionPool::with_limits(Arc::new(DuplexEndpoint { local: node_id(0) }), max)
    }

    #[tokio::test]
    async fn released_streams_are_reused() {
        let pool = pool(4);
        let first = pool.acquire(&node_id(1)).await.unwrap();
        assert!(!first.reused);
        pool.release(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.acquire(&node_id(1)).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.use_count(), 2);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn the_concurrency_cap_holds() {
        let pool = pool(2);
        let a = pool.acquire(&node_id(1)).await.unwrap();
        let _b = pool.acquire(&node_id(2)).await.unwrap();
        assert!(matches!(
            pool.acquire(&node_id(3)).await,
            Err(GatewayError::PoolExhausted(2))
        ));

        pool.discard(a);
        assert!(pool.acquire(&node_id(3)).await.is_ok());
    }

    #[tokio::test]
    async fn idle_sweep_removes_stale_entries() {
        let pool = pool(4);
        let lease = pool.acquire(&node_id(1)).await.unwrap();
        pool.release(lease);
        assert_eq!(pool.cleanup_idle(Duration::from_secs(60)), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(pool.cleanup_idle(Duration::ZERO), 1);
        assert_eq!(pool.idle_count(), 0);
    }
}
