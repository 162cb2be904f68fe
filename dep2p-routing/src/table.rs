// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The per-node route table: a bounded map ordered on demand by Kademlia
//! XOR distance.

use crate::error::{Result, RoutingError};
use crate::types::RouteNode;
use dep2p_protocol::{xor_distance, NodeId};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Entries beyond this are rejected with `TableFull`.
pub const DEFAULT_MAX_TABLE_SIZE: usize = 1_000;
/// Entries idle beyond this are dropped by `cleanup_expired`.
pub const DEFAULT_NODE_EXPIRE_TIME: Duration = Duration::from_secs(30 * 60);

/// Route table for one local node.
pub struct RouteTable {
    local: NodeId,
    max_size: usize,
    expire_after: Duration,
    nodes: RwLock<HashMap<NodeId, RouteNode>>,
}

impl RouteTable {
    pub fn new(local: NodeId) -> Self {
        Self::with_limits(local, DEFAULT_MAX_TABLE_SIZE, DEFAULT_NODE_EXPIRE_TIME)
    }

    pub fn with_limits(local: NodeId, max_size: usize, expire_after: Duration) -> Self {
        Self {
            local,
            max_size,
            expire_after,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    /// Inserts a node. Replacing an existing entry never counts against the
    /// size bound.
    pub fn add_node(&self, node: RouteNode) -> Result<()> {
        let mut nodes = self.nodes.write().expect("route table lock");
        if !nodes.contains_key(&node.peer_id) && nodes.len() >= self.max_size {
            return Err(RoutingError::TableFull(self.max_size));
        }
        let _ = nodes.insert(node.peer_id.clone(), node);
        Ok(())
    }

    pub fn remove_node(&self, id: &NodeId) -> Result<()> {
        let mut nodes = self.nodes.write().expect("route table lock");
        match nodes.remove(id) {
            Some(_) => Ok(()),
            None => Err(RoutingError::NodeNotFound(id.clone())),
        }
    }

    pub fn get_node(&self, id: &NodeId) -> Option<RouteNode> {
        self.nodes.read().expect("route table lock").get(id).cloned()
    }

    /// Applies `f` to the entry, refreshing `last_seen`.
    pub fn update<F: FnOnce(&mut RouteNode)>(&self, id: &NodeId, f: F) -> Result<()> {
        let mut nodes = self.nodes.write().expect("route table lock");
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| RoutingError::NodeNotFound(id.clone()))?;
        f(node);
        node.last_seen = Instant::now();
        Ok(())
    }

    /// Records a probe result for a node already in the table.
    pub fn record_latency(&self, id: &NodeId, latency: Duration) -> Result<()> {
        self.update(id, |node| {
            node.latency = latency;
            node.is_reachable = true;
        })
    }

    pub fn mark_unreachable(&self, id: &NodeId) -> Result<()> {
        self.update(id, |node| node.is_reachable = false)
    }

    /// The `k` reachable nodes nearest to `target` in XOR space, ascending.
    /// `k == 0` yields an empty list.
    pub fn nearest_peers(&self, target: &[u8], k: usize) -> Vec<RouteNode> {
        if k == 0 {
            return Vec::new();
        }
        let mut candidates: Vec<(dep2p_protocol::XorDistance, RouteNode)> = {
            let nodes = self.nodes.read().expect("route table lock");
            nodes
                .values()
                .filter(|node| node.is_reachable)
                .map(|node| {
                    (
                        xor_distance(node.peer_id.as_bytes(), target),
                        node.clone(),
                    )
                })
                .collect()
        };
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.peer_id.cmp(&b.1.peer_id))
        });
        candidates.truncate(k);
        candidates.into_iter().map(|(_, node)| node).collect()
    }

    /// Snapshot of every entry; the pathfinder computes on the copy without
    /// holding the lock.
    pub fn all_nodes(&self) -> Vec<RouteNode> {
        self.nodes
            .read()
            .expect("route table lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.read().expect("route table lock").contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("route table lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries not seen within the expiry window. Returns the count
    /// removed.
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = Instant::now() - self.expire_after;
        let mut nodes = self.nodes.write().expect("route table lock");
        let before = nodes.len();
        nodes.retain(|_, node| node.last_seen >= cutoff);
        before - nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dep2p_protocol::Multiaddr;

    fn node_id(n: u8) -> NodeId {
        NodeId::from_bytes(&[n; 32]).unwrap()
    }

    fn route_node(n: u8) -> RouteNode {
        let addr = Multiaddr::parse(&format!("/ip4/10.0.0.{n}/tcp/4001")).unwrap();
        RouteNode::new(node_id(n), vec![addr])
    }

    fn table() -> RouteTable {
        RouteTable::new(node_id(0))
    }

    #[test]
    fn add_get_remove() {
        let table = table();
        table.add_node(route_node(1)).unwrap();
        assert!(table.get_node(&node_id(1)).is_some());
        table.remove_node(&node_id(1)).unwrap();
        assert!(matches!(
            table.remove_node(&node_id(1)),
            Err(RoutingError::NodeNotFound(_))
        ));
    }

    #[test]
    fn capacity_is_bounded() {
        let table = RouteTable::with_limits(node_id(0), 2, DEFAULT_NODE_EXPIRE_TIME);
        table.add_node(route_node(1)).unwrap();
        table.add_node(route_node(2)).unwrap();
        assert!(matches!(
            table.add_node(route_node(3)),
            Err(RoutingError::TableFull(2))
        ));
        // Replacement is not growth.
        table.add_node(route_node(2)).unwrap();
    }

    #[test]
    fn nearest_peers_sorts_by_distance() {
        let table = table();
        for n in 1..=20 {
            table.add_node(route_node(n)).unwrap();
        }
        let target = *node_id(3).as_bytes();
        let nearest = table.nearest_peers(&target, 5);
        assert_eq!(nearest.len(), 5);
        assert_eq!(nearest[0].peer_id, node_id(3));

        let mut previous = xor_distance(nearest[0].peer_id.as_bytes(), &target);
        for node in &nearest[1..] {
            let distance = xor_distance(node.peer_id.as_bytes(), &target);
            assert!(previous <= distance);
            previous = distance;
        }
    }

    #[test]
    fn nearest_peers_skips_unreachable_and_zero_k() {
        let table = table();
        table.add_node(route_node(1)).unwrap();
        table.add_node(route_node(2)).unwrap();
        table.mark_unreachable(&node_id(2)).unwrap();

        let target = *node_id(2).as_bytes();
        let nearest = table.nearest_peers(&target, 10);
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].peer_id, node_id(1));
        assert!(table.nearest_peers(&target, 0).is_empty());
    }

    #[test]
    fn cleanup_drops_idle_entries() {
        let table = RouteTable::with_limits(node_id(0), 10, Duration::ZERO);
        table.add_node(route_node(1)).unwrap();
        // Zero expiry means everything not refreshed in this instant goes.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.cleanup_expired(), 1);
        assert!(table.is_empty());
    }
}
