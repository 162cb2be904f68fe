// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Multiaddr handling.
//!
//! The transport layer is an external collaborator, so addresses stay in
//! their self-describing string form here. This module validates the shape
//! and manipulates the trailing `/p2p/<NodeId>` segment.

use crate::error::{Error, Result};
use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Max addresses carried for a single peer.
pub const MAX_ADDRS_PER_PEER: usize = 16;

/// A self-describing network address, e.g.
/// `/ip4/10.0.0.1/udp/4001/quic-v1/p2p/<NodeId>`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Multiaddr(String);

impl Multiaddr {
    /// Parses and validates the segment shape. Protocol names are not
    /// interpreted beyond `p2p` and `dnsaddr`; the dialer owns that.
    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') || s.len() < 2 {
            return Err(Error::InvalidMultiaddr(s.to_string()));
        }
        if s.split('/').skip(1).any(|seg| seg.is_empty()) {
            return Err(Error::InvalidMultiaddr(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The NodeId in the trailing `/p2p/` segment, if present.
    pub fn node_id(&self) -> Option<NodeId> {
        let mut segments = self.0.split('/').skip(1);
        while let Some(seg) = segments.next() {
            if seg == "p2p" {
                let id = segments.next()?;
                return NodeId::from_str_any(id).ok();
            }
        }
        None
    }

    /// The nested domain of a `/dnsaddr/<domain>` address, if that is the
    /// leading protocol.
    pub fn dnsaddr_domain(&self) -> Option<&str> {
        let mut segments = self.0.split('/').skip(1);
        match (segments.next(), segments.next()) {
            (Some("dnsaddr"), Some(domain)) => Some(domain),
            _ => None,
        }
    }

    /// Returns the address with `/p2p/<id>` appended, replacing any existing
    /// p2p segment.
    pub fn with_p2p(&self, id: &NodeId) -> Multiaddr {
        let base = self.strip_p2p();
        Multiaddr(format!("{}/p2p/{}", base.0, id.to_base58()))
    }

    /// Returns the address without its trailing `/p2p/<id>` segment.
    pub fn strip_p2p(&self) -> Multiaddr {
        if let Some(pos) = self.0.find("/p2p/") {
            Multiaddr(self.0[..pos].to_string())
        } else {
            self.clone()
        }
    }

    /// Full-address validation: the `/p2p/` segment must be present and match
    /// the expected NodeId. Bootstrap contact lists require this; transient
    /// discovery records do not.
    pub fn require_full_address(&self, expected: &NodeId) -> Result<()> {
        match self.node_id() {
            None => Err(Error::MultiaddrMissingPeerId),
            Some(id) if &id != expected => Err(Error::MultiaddrPeerIdMismatch),
            Some(_) => Ok(()),
        }
    }
}

impl Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Multiaddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A peer with its known addresses and the discovery source that reported it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub addrs: Vec<Multiaddr>,
    pub source: String,
}

impl PeerInfo {
    /// Builds a `PeerInfo`, enforcing the per-peer address bound.
    pub fn new(id: NodeId, addrs: Vec<Multiaddr>, source: impl Into<String>) -> Result<Self> {
        if addrs.len() > MAX_ADDRS_PER_PEER {
            return Err(Error::TooManyAddresses(MAX_ADDRS_PER_PEER));
        }
        Ok(Self {
            id,
            addrs,
            source: source.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeId {
        NodeId::from_bytes(&[1u8; 32]).unwrap()
    }

    #[test]
    fn parse_rejects_malformed_addrs() {
        assert!(Multiaddr::parse("").is_err());
        assert!(Multiaddr::parse("ip4/1.2.3.4").is_err());
        assert!(Multiaddr::parse("/ip4//tcp/1").is_err());
        assert!(Multiaddr::parse("/ip4/1.2.3.4/tcp/4001").is_ok());
    }

    #[test]
    fn p2p_segment_round_trips() {
        let id = node();
        let addr = Multiaddr::parse("/ip4/1.2.3.4/udp/4001/quic-v1").unwrap();
        let full = addr.with_p2p(&id);
        assert_eq!(full.node_id(), Some(id.clone()));
        assert_eq!(full.strip_p2p(), addr);
        assert!(full.require_full_address(&id).is_ok());
    }

    #[test]
    fn full_address_validation_catches_mismatch() {
        let id = node();
        let other = NodeId::from_bytes(&[2u8; 32]).unwrap();
        let bare = Multiaddr::parse("/ip4/1.2.3.4/tcp/4001").unwrap();
        assert_eq!(
            bare.require_full_address(&id),
            Err(Error::MultiaddrMissingPeerId)
        );
        assert_eq!(
            bare.with_p2p(&other).require_full_address(&id),
            Err(Error::MultiaddrPeerIdMismatch)
        );
    }

    #[test]
    fn dnsaddr_domain_is_extracted() {
        let addr = Multiaddr::parse("/dnsaddr/bootstrap.example.com").unwrap();
        assert_eq!(addr.dnsaddr_domain(), Some("bootstrap.example.com"));
        let plain = Multiaddr::parse("/ip4/1.2.3.4/tcp/1").unwrap();
        assert_eq!(plain.dnsaddr_domain(), None);
    }

    #[test]
    fn peer_info_bounds_addresses() {
        let id = node();
        let addrs = (0..17)
            .map(|i| Multiaddr::parse(&format!("/ip4/1.2.3.4/tcp/{i}")).unwrap())
            .collect::<Vec<_>>();
        assert!(matches!(
            PeerInfo::new(id, addrs, "test"),
            Err(Error::TooManyAddresses(_))
        ));
    }
}
