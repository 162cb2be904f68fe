// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Weighted least-load selection over reported node loads.

use crate::error::{Result, RoutingError};
use crate::types::NodeLoad;
use dep2p_protocol::NodeId;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Connection count normalizer in the score.
const CONNECTIONS_SCALE: f64 = 100.0;
/// Bandwidth normalizer in the score (1 MiB/s).
const BANDWIDTH_SCALE: f64 = 1024.0 * 1024.0;
/// CPU fraction above which a node counts as overloaded.
const OVERLOAD_CPU: f64 = 0.8;
/// Connection count above which a node counts as overloaded.
const OVERLOAD_CONNECTIONS: u32 = 1_000;

/// Tracks reported loads and picks the least-loaded candidate.
#[derive(Default)]
pub struct LoadBalancer {
    loads: RwLock<HashMap<NodeId, NodeLoad>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a node's self-reported load.
    pub fn update_load(&self, node: NodeId, load: NodeLoad) {
        let _ = self
            .loads
            .write()
            .expect("load balancer lock")
            .insert(node, load);
    }

    pub fn load_of(&self, node: &NodeId) -> Option<NodeLoad> {
        self.loads
            .read()
            .expect("load balancer lock")
            .get(node)
            .copied()
    }

    /// `0.4*conns/100 + 0.3*bandwidth/1MiB + 0.3*cpu`; unknown nodes score
    /// zero (nothing reported, nothing held against them).
    pub fn score(&self, node: &NodeId) -> f64 {
        self.load_of(node).map_or(0.0, score_of)
    }

    /// Picks the lowest-scored candidate, preferring non-overloaded nodes.
    /// When every candidate is overloaded the least-loaded of the full set
    /// still wins; the caller asked for *somebody*.
    pub fn select(&self, candidates: &[NodeId]) -> Result<NodeId> {
        if candidates.is_empty() {
            return Err(RoutingError::NoViablePath);
        }

        let loads = self.loads.read().expect("load balancer lock");
        let scored: Vec<(f64, bool, &NodeId)> = candidates
            .iter()
            .map(|node| match loads.get(node) {
                Some(load) => (score_of(*load), is_overloaded(load), node),
                None => (0.0, false, node),
            })
            .collect();
        drop(loads);

        let healthy = scored
            .iter()
            .filter(|(_, overloaded, _)| !overloaded)
            .min_by(|a, b| a.0.total_cmp(&b.0));
        let chosen = match healthy {
            Some(entry) => entry,
            None => scored
                .iter()
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .ok_or(RoutingError::NoViablePath)?,
        };
        Ok(chosen.2.clone())
    }

    /// Drops load reports older than `max_age`. Returns the count removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let cutoff = Instant::now() - max_age;
        let mut loads = self.loads.write().expect("load balancer lock");
        let before = loads.len();
        loads.retain(|_, load| load.last_updated >= cutoff);
        before - loads.len()
    }

    pub fn tracked(&self) -> usize {
        self.loads.read().expect("load balancer lock").len()
    }
}

fn score_of(load: NodeLoad) -> f64 {
    0.4 * (load.connection_count as f64 / CONNECTIONS_SCALE)
        + 0.3 * (load.bandwidth_usage as f64 / BANDWIDTH_SCALE)
        + 0.3 * load.cpu_usage
}

fn is_overloaded(load: &NodeLoad) -> bool {
    load.cpu_usage > OVERLOAD_CPU || load.connection_count > OVERLOAD_CONNECTIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(n: u8) -> NodeId {
        NodeId::from_bytes(&[n; 32]).unwrap()
    }

    fn load(conns: u32, bw: u64, cpu: f64) -> NodeLoad {
        NodeLoad {
            connection_count: conns,
            bandwidth_usage: bw,
            cpu_usage: cpu,
            last_updated: Instant::now(),
        }
    }

    #[test]
    fn lowest_score_wins() {
        let balancer = LoadBalancer::new();
        balancer.update_load(node_id(1), load(50, 0, 0.1));
        balancer.update_load(node_id(2), load(10, 0, 0.1));
        let chosen = balancer.select(&[node_id(1), node_id(2)]).unwrap();
        assert_eq!(chosen, node_id(2));
    }

    #[test]
    fn overloaded_nodes_lose_to_healthy_ones() {
        let balancer = LoadBalancer::new();
        // Lowest raw score, but overloaded on CPU.
        balancer.update_load(node_id(1), load(0, 0, 0.9));
        balancer.update_load(node_id(2), load(80, 0, 0.5));
        let chosen = balancer.select(&[node_id(1), node_id(2)]).unwrap();
        assert_eq!(chosen, node_id(2));
    }

    #[test]
    fn all_overloaded_falls_back_to_least_loaded() {
        let balancer = LoadBalancer::new();
        balancer.update_load(node_id(1), load(2_000, 0, 0.9));
        balancer.update_load(node_id(2), load(1_500, 0, 0.95));
        let chosen = balancer.select(&[node_id(1), node_id(2)]).unwrap();
        assert_eq!(chosen, node_id(2));
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let balancer = LoadBalancer::new();
        assert!(matches!(
            balancer.select(&[]),
            Err(RoutingError::NoViablePath)
        ));
    }

    #[test]
    fn stale_reports_are_pruned() {
        let balancer = LoadBalancer::new();
        balancer.update_load(node_id(1), load(1, 0, 0.1));
        assert_eq!(balancer.cleanup_stale(Duration::ZERO), 1);
        assert_eq!(balancer.tracked(), 0);
    }
}
