// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use dep2p_protocol::{NodeId, PeerInfo, RealmId};
use std::time::{Duration, Instant, SystemTime};
use strum::Display;

/// Where a discovery result may come from, in decreasing default preference.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum DiscoverySource {
    /// DHT provider records.
    Provider,
    /// Rendezvous point registrations.
    Rendezvous,
    /// The local known-peer cache.
    Local,
}

/// Key namespacing mode for a query or registration.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum Scope {
    /// Resolve to Realm when the caller is in a non-default realm, else Sys.
    #[default]
    Auto,
    /// Force the system namespace.
    Sys,
    /// Force the caller's (or an explicit) realm namespace.
    Realm,
}

/// A discovery query against the coordinator.
#[derive(Clone, Debug)]
pub struct DiscoveryQuery {
    pub namespace: String,
    pub scope: Scope,
    /// Explicit realm override; empty means "the coordinator's realm".
    pub realm_id: RealmId,
    /// Sources to fan out to, in priority order.
    pub sources: Vec<DiscoverySource>,
    /// Also report the local node when it matches the namespace.
    pub include_local: bool,
    /// Zero streams every result the sources produce.
    pub limit: usize,
    pub timeout: Duration,
}

impl Default for DiscoveryQuery {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            scope: Scope::Auto,
            realm_id: RealmId::default(),
            sources: vec![
                DiscoverySource::Provider,
                DiscoverySource::Rendezvous,
                DiscoverySource::Local,
            ],
            include_local: false,
            limit: 0,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DiscoveryQuery {
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

/// A service registration request against the coordinator.
#[derive(Clone, Debug)]
pub struct ServiceRegistration {
    pub namespace: String,
    pub scope: Scope,
    pub realm_id: RealmId,
    /// Sources to register with; Local is implied and ignored here.
    pub sources: Vec<DiscoverySource>,
    pub ttl: Duration,
}

impl Default for ServiceRegistration {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            scope: Scope::Auto,
            realm_id: RealmId::default(),
            sources: vec![DiscoverySource::Provider, DiscoverySource::Rendezvous],
            ttl: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Access policy of the realm the coordinator currently serves.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum AccessLevel {
    /// Anyone may be admitted to the peer cache.
    #[default]
    Public,
    /// Only realm members are admitted; non-members are silently dropped.
    Private,
}

/// A peer in the coordinator's cache.
#[derive(Clone, Debug)]
pub struct KnownPeer {
    pub info: PeerInfo,
    /// Realm the record was discovered under.
    pub realm_id: RealmId,
    pub last_seen: SystemTime,
}

/// Resolution of `(namespace, scope, realm)` into an effective key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedScope {
    pub scope: Scope,
    pub namespace: String,
    pub full_key: String,
    /// Realm the key is namespaced under; default for Sys keys.
    pub realm_id: RealmId,
}

/// Bookkeeping for one active service registration.
#[derive(Clone, Debug)]
pub struct ActiveRegistration {
    pub namespace: String,
    pub full_key: String,
    pub sources: Vec<DiscoverySource>,
    pub ttl: Duration,
    pub registered_at: Instant,
    pub expires_at: Instant,
}

impl ActiveRegistration {
    /// Renewal fires once less than half the TTL remains.
    pub fn renew_at(&self) -> Instant {
        self.expires_at - self.ttl / 2
    }

    pub(crate) fn needs_renewal(&self, now: Instant) -> bool {
        now > self.renew_at()
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.registered_at = now;
        self.expires_at = now + self.ttl;
    }
}

/// Node identifier paired with its dial addresses, as configured for
/// bootstrap contact lists.
#[derive(Clone, Debug)]
pub struct BootstrapPeer {
    pub id: NodeId,
    pub addrs: Vec<dep2p_protocol::Multiaddr>,
}
