// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Realm routing for the dep2p realm network.
//!
//! A Kademlia-ordered [`RouteTable`] feeds the [`PathFinder`] (Dijkstra and
//! Yen's K-paths); the [`Router`] layers an LRU+TTL [`RouteCache`], policy
//! based selection via the [`LoadBalancer`], and a relay fallback seam for
//! targets the table cannot reach. The [`LatencyProber`] keeps edge weights
//! honest.

#[macro_use]
extern crate tracing;

pub mod balancer;
pub mod cache;
pub mod error;
pub mod pathfinder;
pub mod prober;
pub mod router;
pub mod table;
pub mod types;

pub use balancer::LoadBalancer;
pub use cache::RouteCache;
pub use error::RoutingError;
pub use pathfinder::PathFinder;
pub use prober::LatencyProber;
pub use router::{RelayRouteProvider, Router};
pub use table::RouteTable;
pub use types::{LatencyStats, NodeLoad, Path, Route, RouteNode, RoutePolicy};
