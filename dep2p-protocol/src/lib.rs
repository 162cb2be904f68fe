// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Protocol definitions for the dep2p realm network.
//!
//! This crate carries everything the higher layers agree on: identity types,
//! realm key derivation, the Kademlia XOR metric, multiaddr handling, wire
//! message codecs, discovery namespace keys, and the collaborator traits the
//! out-of-scope transport implements.

#[macro_use]
extern crate tracing;

pub mod dht_key;
pub mod endpoint;
pub mod error;
pub mod messages;
pub mod multiaddr;
pub mod node_id;
pub mod realm;
pub mod version;

pub use dht_key::{realm_aware_key, realm_aware_node_key, to_key_bytes, xor_distance, XorDistance};
pub use error::{Error, Result};
pub use multiaddr::{Multiaddr, PeerInfo, MAX_ADDRS_PER_PEER};
pub use node_id::{NodeId, RealmId, NODE_ID_LEN};
pub use realm::{derive_auth_key, derive_realm_id, AuthKey, MIN_PSK_LEN};
