// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Path computation over the route table.
//!
//! Dijkstra for the single shortest path, Yen's algorithm for K alternative
//! paths. The graph is implicit: a node's neighbors are its 20 XOR-nearest
//! reachable table entries, and an edge costs the neighbor's measured
//! latency (or a 10 ms default when unmeasured). Computations run on table
//! snapshots; no table lock is held while searching.

use crate::error::{Result, RoutingError};
use crate::table::RouteTable;
use crate::types::Path;
use dep2p_protocol::NodeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Weight assumed for edges without a latency measurement.
pub const DEFAULT_EDGE_LATENCY: Duration = Duration::from_millis(10);
/// Neighbor fan-out considered per node during search.
const NEIGHBOR_FANOUT: usize = 20;
/// Lifetime of a cached shortest path.
const PATH_CACHE_TTL: Duration = Duration::from_secs(30);

/// Shortest-path engine over a shared route table.
pub struct PathFinder {
    table: Arc<RouteTable>,
    /// Shortest paths cached by target.
    cache: Mutex<HashMap<NodeId, (Path, Instant)>>,
}

impl PathFinder {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self {
            table,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The lowest-latency path from `src` to `dst`.
    pub fn find_shortest_path(&self, src: &NodeId, dst: &NodeId) -> Result<Path> {
        if let Some(path) = self.cached(dst) {
            return Ok(path);
        }

        let path = self
            .dijkstra(src, dst, &HashSet::new(), &HashSet::new())
            .ok_or_else(|| RoutingError::PathNotFound {
                from: src.clone(),
                to: dst.clone(),
            })?;

        let mut cache = self.cache.lock().expect("path cache lock");
        let _ = cache.insert(dst.clone(), (path.clone(), Instant::now() + PATH_CACHE_TTL));
        Ok(path)
    }

    /// Up to `k` loopless paths from `src` to `dst`, shortest first (Yen).
    pub fn find_multiple_paths(&self, src: &NodeId, dst: &NodeId, k: usize) -> Result<Vec<Path>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let first = self
            .dijkstra(src, dst, &HashSet::new(), &HashSet::new())
            .ok_or_else(|| RoutingError::PathNotFound {
                from: src.clone(),
                to: dst.clone(),
            })?;

        let mut shortest: Vec<Path> = vec![first];
        let mut candidates: Vec<Path> = Vec::new();
        let mut seen: HashSet<String> = shortest.iter().map(|p| path_key(p)).collect();

        while shortest.len() < k {
            let previous = &shortest[shortest.len() - 1];

            for i in 0..previous.nodes.len().saturating_sub(1) {
                let spur_node = previous.nodes[i].clone();
                let root = &previous.nodes[..=i];

                // Suppress the edge every accepted path takes out of this
                // root, forcing the spur onto new ground.
                let mut suppressed: HashSet<(NodeId, NodeId)> = HashSet::new();
                for accepted in &shortest {
                    if accepted.nodes.len() > i + 1 && accepted.nodes[..=i] == *root {
                        let _ = suppressed
                            .insert((accepted.nodes[i].clone(), accepted.nodes[i + 1].clone()));
                    }
                }
                // Loopless: the root (minus the spur node) is off-limits.
                let excluded: HashSet<NodeId> = root[..i].iter().cloned().collect();

                let Some(spur) = self.dijkstra(&spur_node, dst, &suppressed, &excluded) else {
                    continue;
                };

                let mut nodes = root[..i].to_vec();
                nodes.extend(spur.nodes.iter().cloned());
                let total = self.root_latency(root) + spur.total_latency;
                let candidate = Path {
                    hops: nodes.len().saturating_sub(1),
                    nodes,
                    total_latency: total,
                    valid: true,
                };

                let key = path_key(&candidate);
                if seen.insert(key) {
                    candidates.push(candidate);
                }
            }

            if candidates.is_empty() {
                break;
            }
            candidates.sort_by_key(|path| path.total_latency);
            shortest.push(candidates.remove(0));
        }

        Ok(shortest)
    }

    /// Forgets the cached path towards `target`.
    pub fn invalidate(&self, target: &NodeId) {
        let _ = self.cache.lock().expect("path cache lock").remove(target);
    }

    fn cached(&self, dst: &NodeId) -> Option<Path> {
        let mut cache = self.cache.lock().expect("path cache lock");
        match cache.get(dst) {
            Some((path, expires)) if *expires > Instant::now() => Some(path.clone()),
            Some(_) => {
                let _ = cache.remove(dst);
                None
            }
            None => None,
        }
    }

    /// Cost of walking an already-chosen path prefix.
    fn root_latency(&self, root: &[NodeId]) -> Duration {
        let mut total = Duration::ZERO;
        for window in root.windows(2) {
            total += self.edge_weight(&window[1]);
        }
        total
    }

    fn edge_weight(&self, to: &NodeId) -> Duration {
        match self.table.get_node(to) {
            Some(node) if !node.latency.is_zero() => node.latency,
            _ => DEFAULT_EDGE_LATENCY,
        }
    }

    /// Dijkstra with optional suppressed edges and excluded nodes.
    fn dijkstra(
        &self,
        src: &NodeId,
        dst: &NodeId,
        suppressed: &HashSet<(NodeId, NodeId)>,
        excluded: &HashSet<NodeId>,
    ) -> Option<Path> {
        if src == dst {
            return Some(Path {
                nodes: vec![src.clone()],
                total_latency: Duration::ZERO,
                hops: 0,
                valid: true,
            });
        }

        let mut dist: HashMap<NodeId, Duration> = HashMap::new();
        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut heap: BinaryHeap<Reverse<(Duration, NodeId)>> = BinaryHeap::new();

        let _ = dist.insert(src.clone(), Duration::ZERO);
        heap.push(Reverse((Duration::ZERO, src.clone())));

        while let Some(Reverse((cost, current))) = heap.pop() {
            if current == *dst {
                return Some(self.assemble(src, dst, cost, &prev));
            }
            if dist.get(&current).is_some_and(|best| *best < cost) {
                continue;
            }

            for neighbor in self
                .table
                .nearest_peers(current.as_bytes(), NEIGHBOR_FANOUT)
            {
                let next = neighbor.peer_id.clone();
                if next == current || excluded.contains(&next) {
                    continue;
                }
                if suppressed.contains(&(current.clone(), next.clone())) {
                    continue;
                }
                let weight = if neighbor.latency.is_zero() {
                    DEFAULT_EDGE_LATENCY
                } else {
                    neighbor.latency
                };
                let candidate = cost + weight;
                if dist
                    .get(&next)
                    .map_or(true, |best| candidate < *best)
                {
                    let _ = dist.insert(next.clone(), candidate);
                    let _ = prev.insert(next.clone(), current.clone());
                    heap.push(Reverse((candidate, next)));
                }
            }
        }
        None
    }

    fn assemble(
        &self,
        src: &NodeId,
        dst: &NodeId,
        total: Duration,
        prev: &HashMap<NodeId, NodeId>,
    ) -> Path {
        let mut nodes = vec![dst.clone()];
        let mut current = dst.clone();
        while current != *src {
            match prev.get(&current) {
                Some(parent) => {
                    nodes.push(parent.clone());
                    current = parent.clone();
                }
                None => break,
            }
        }
        nodes.reverse();
        Path {
            hops: nodes.len().saturating_sub(1),
            nodes,
            total_latency: total,
            valid: true,
        }
    }
}

fn path_key(path: &Path) -> String {
    path.nodes
        .iter()
        .map(|node| node.to_hex())
        .collect::<Vec<_>>()
        .join(">")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteNode;
    use dep2p_protocol::Multiaddr;

    fn node_id(n: u8) -> NodeId {
        NodeId::from_bytes(&[n; 32]).unwrap()
    }

    fn add(table: &RouteTable, n: u8, latency_ms: u64) {
        let addr = Multiaddr::parse(&format!("/ip4/10.0.0.{n}/tcp/4001")).unwrap();
        let mut node = RouteNode::new(node_id(n), vec![addr]);
        node.latency = Duration::from_millis(latency_ms);
        table.add_node(node).unwrap();
    }

    fn small_mesh() -> Arc<RouteTable> {
        // Node counts stay below the neighbor fan-out, so the mesh is fully
        // connected and edge cost is simply the destination's latency.
        let table = Arc::new(RouteTable::new(node_id(0)));
        add(&table, 1, 10);
        add(&table, 2, 20);
        add(&table, 3, 40);
        table
    }

    #[test]
    fn shortest_path_prefers_the_direct_edge() {
        let finder = PathFinder::new(small_mesh());
        let path = finder
            .find_shortest_path(&node_id(0), &node_id(1))
            .unwrap();
        assert!(path.valid);
        assert_eq!(path.nodes, vec![node_id(0), node_id(1)]);
        assert_eq!(path.hops, 1);
        assert_eq!(path.total_latency, Duration::from_millis(10));
    }

    #[test]
    fn unknown_destination_is_path_not_found() {
        let finder = PathFinder::new(small_mesh());
        assert!(matches!(
            finder.find_shortest_path(&node_id(0), &node_id(99)),
            Err(RoutingError::PathNotFound { .. })
        ));
    }

    #[test]
    fn unmeasured_latency_defaults_to_ten_ms() {
        let table = Arc::new(RouteTable::new(node_id(0)));
        add(&table, 1, 0);
        let finder = PathFinder::new(table);
        let path = finder
            .find_shortest_path(&node_id(0), &node_id(1))
            .unwrap();
        assert_eq!(path.total_latency, DEFAULT_EDGE_LATENCY);
    }

    #[test]
    fn yen_produces_distinct_ranked_paths() {
        let finder = PathFinder::new(small_mesh());
        let paths = finder
            .find_multiple_paths(&node_id(0), &node_id(3), 3)
            .unwrap();
        assert_eq!(paths.len(), 3);

        // Ranked by latency, all distinct, all ending at the target.
        for pair in paths.windows(2) {
            assert!(pair[0].total_latency <= pair[1].total_latency);
            assert_ne!(pair[0].nodes, pair[1].nodes);
        }
        for path in &paths {
            assert_eq!(path.nodes.last(), Some(&node_id(3)));
            assert_eq!(path.nodes.first(), Some(&node_id(0)));
        }
        // The direct hop wins.
        assert_eq!(paths[0].nodes, vec![node_id(0), node_id(3)]);
        assert_eq!(paths[0].total_latency, Duration::from_millis(40));
    }

    #[test]
    fn yen_with_k_one_matches_dijkstra() {
        let finder = PathFinder::new(small_mesh());
        let single = finder
            .find_multiple_paths(&node_id(0), &node_id(2), 1)
            .unwrap();
        let shortest = finder
            .find_shortest_path(&node_id(0), &node_id(2))
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].nodes, shortest.nodes);
    }
}
