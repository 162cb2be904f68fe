// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use dep2p_protocol::{Multiaddr, NodeId};
use std::time::{Duration, Instant};
use strum::Display;

/// One entry in the route table.
#[derive(Clone, Debug)]
pub struct RouteNode {
    pub peer_id: NodeId,
    pub addrs: Vec<Multiaddr>,
    /// Zero when no probe has measured this node yet.
    pub latency: Duration,
    pub last_seen: Instant,
    pub is_reachable: bool,
    /// Relative load in `[0, 1]`, reported by the balancer.
    pub load: f64,
}

impl RouteNode {
    pub fn new(peer_id: NodeId, addrs: Vec<Multiaddr>) -> Self {
        Self {
            peer_id,
            addrs,
            latency: Duration::ZERO,
            last_seen: Instant::now(),
            is_reachable: true,
            load: 0.0,
        }
    }
}

/// An established route towards a target. Immutable once built; refreshes
/// replace the whole value.
#[derive(Clone, Debug)]
pub struct Route {
    pub target: NodeId,
    pub next_hop: NodeId,
    /// Full node sequence including source and target.
    pub path: Vec<NodeId>,
    pub latency: Duration,
    pub hops: usize,
    pub score: f64,
    pub created_at: Instant,
}

/// Result of a shortest-path computation.
#[derive(Clone, Debug)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub total_latency: Duration,
    pub hops: usize,
    pub valid: bool,
}

/// Load figures a peer reports about itself.
#[derive(Clone, Copy, Debug)]
pub struct NodeLoad {
    pub connection_count: u32,
    /// Bytes per second.
    pub bandwidth_usage: u64,
    /// Fraction in `[0, 1]`.
    pub cpu_usage: f64,
    pub last_updated: Instant,
}

/// Route selection policy.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum RoutePolicy {
    #[default]
    LowestLatency,
    LeastHops,
    LoadBalance,
    /// `0.5*latency + 0.3*hops + 0.2*load`, each normalized monotonically.
    Mixed,
}

/// Latency statistics over a probe window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyStats {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}
