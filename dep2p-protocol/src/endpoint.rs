// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Collaborator interfaces to the transport layer.
//!
//! Dialing, listening and stream multiplexing live outside this workspace;
//! these traits are the entire surface they present. Discovery, routing and
//! the gateway are all written against them, which also makes every network
//! interaction mockable in tests.

use crate::multiaddr::Multiaddr;
use crate::node_id::NodeId;
use async_trait::async_trait;
use std::io;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream negotiated for one protocol.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

/// Owned trait object form used across subsystem boundaries.
pub type BoxStream = Box<dyn RawStream>;

/// The local transport endpoint.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The NodeId this endpoint was booted with.
    fn local_node(&self) -> NodeId;

    /// Addresses the local node is reachable at, suitable for announcing.
    fn local_addrs(&self) -> Vec<Multiaddr>;

    /// Opens a stream to `node` negotiated for `protocol`. Dials first if no
    /// connection exists.
    async fn open_stream(&self, node: &NodeId, protocol: &str) -> io::Result<BoxStream>;

    /// Connects to `node` at the given addresses, verifying the remote
    /// identity matches.
    async fn dial(&self, node: &NodeId, addrs: &[Multiaddr]) -> io::Result<()>;

    /// Nodes with at least one live connection.
    fn connected_nodes(&self) -> Vec<NodeId>;

    /// Observed remote addresses of a connected node.
    fn remote_addrs(&self, node: &NodeId) -> Vec<Multiaddr>;
}

/// Read-mostly address records kept by the host.
///
/// Injected into the DHT lookup path with read-only semantics to break the
/// discovery -> dial -> discovery cycle.
pub trait AddressBook: Send + Sync {
    fn addrs_of(&self, node: &NodeId) -> Vec<Multiaddr>;
    fn add_addrs(&self, node: &NodeId, addrs: &[Multiaddr], ttl: Duration);
}

/// Injectable clock. Wall time drives TTL and replay-window checks; the
/// monotonic instant drives every relative comparison.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn instant(&self) -> Instant;
}

/// The process clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}
