// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Multi-source peer discovery for the dep2p realm network.
//!
//! The [`DiscoveryCoordinator`] federates DHT providers, rendezvous points,
//! DNS contact domains, bootstrap lists and the local peer cache behind a
//! single query/register API with realm-aware namespacing. Backends plug in
//! through the capability traits in [`backend`]; the transport arrives as an
//! [`dep2p_protocol::endpoint::Endpoint`] collaborator.

#[macro_use]
extern crate tracing;

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod dns;
pub mod error;
pub mod interval;
pub mod rendezvous;
pub mod types;

pub use backend::{
    Announcer, ClosestPeerFinder, Discoverer, DiscoveryBackend, NamespaceDiscoverer, PeerFinder,
    PeerGossip,
};
pub use bootstrap::{BootstrapConfig, BootstrapDiscoverer};
pub use config::DiscoveryConfig;
pub use coordinator::DiscoveryCoordinator;
pub use dns::{DnsConfig, DnsDiscoverer};
pub use error::DiscoveryError;
pub use interval::DynamicInterval;
pub use rendezvous::{RendezvousConfig, RendezvousDiscoverer, RendezvousPoint, RendezvousStore};
pub use types::{
    AccessLevel, BootstrapPeer, DiscoveryQuery, DiscoverySource, Scope, ServiceRegistration,
};
