// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Kademlia XOR metric and realm-namespaced DHT keys.

use crate::node_id::{NodeId, RealmId};
use sha2::{Digest, Sha256};

/// Length of a DHT key in bytes (a 256-bit space).
pub const DHT_KEY_LEN: usize = 32;

/// XOR distance between two 256-bit keys.
///
/// Ordered by big-endian magnitude, so sorting by `XorDistance` sorts by
/// closeness in the Kademlia sense.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XorDistance([u8; DHT_KEY_LEN]);

impl XorDistance {
    pub const ZERO: XorDistance = XorDistance([0u8; DHT_KEY_LEN]);

    pub fn as_bytes(&self) -> &[u8; DHT_KEY_LEN] {
        &self.0
    }

    /// Position of the highest set bit, or `None` for the zero distance.
    /// Mirrors the kbucket index of the distance.
    pub fn ilog2(&self) -> Option<u32> {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let bit = 7 - byte.leading_zeros();
                return Some((DHT_KEY_LEN - 1 - i) as u32 * 8 + bit);
            }
        }
        None
    }
}

impl std::fmt::Debug for XorDistance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "XorDistance({})", hex::encode(&self.0[..4]))
    }
}

/// Normalizes an arbitrary key into the 256-bit space.
///
/// 64-char hex strings decode to their raw 32 bytes; exactly-32-byte inputs
/// pass through; anything else is SHA-256 hashed.
pub fn to_key_bytes(input: &[u8]) -> [u8; DHT_KEY_LEN] {
    if let Ok(arr) = <[u8; DHT_KEY_LEN]>::try_from(input) {
        return arr;
    }
    if input.len() == DHT_KEY_LEN * 2 {
        if let Ok(decoded) = hex::decode(input) {
            if let Ok(arr) = <[u8; DHT_KEY_LEN]>::try_from(decoded.as_slice()) {
                return arr;
            }
        }
    }
    Sha256::digest(input).into()
}

/// XOR distance between two keys, after [`to_key_bytes`] normalization.
pub fn xor_distance(a: &[u8], b: &[u8]) -> XorDistance {
    let a = to_key_bytes(a);
    let b = to_key_bytes(b);
    let mut out = [0u8; DHT_KEY_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    XorDistance(out)
}

/// Realm-namespaced DHT key: `SHA256(realm_id || key)`.
///
/// For the default realm the key passes through unnamespaced, so system-wide
/// lookups stay compatible with realm-unaware peers.
pub fn realm_aware_key(realm: &RealmId, key: &[u8; DHT_KEY_LEN]) -> [u8; DHT_KEY_LEN] {
    if realm.is_default() {
        return *key;
    }
    let mut hasher = Sha256::new();
    hasher.update(realm.as_str().as_bytes());
    hasher.update(key);
    hasher.finalize().into()
}

/// Realm-namespaced key for a specific node, used to publish and look up
/// per-node provider records.
pub fn realm_aware_node_key(realm: &RealmId, node: &NodeId) -> [u8; DHT_KEY_LEN] {
    realm_aware_key(realm, node.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn distance_to_self_is_zero() {
        let id = NodeId::from_bytes(&[9u8; 32]).unwrap();
        assert_eq!(xor_distance(id.as_bytes(), id.as_bytes()), XorDistance::ZERO);
    }

    #[test]
    fn hex_keys_decode_to_raw_bytes() {
        let raw = [3u8; 32];
        let hex_form = hex::encode(raw);
        assert_eq!(
            xor_distance(hex_form.as_bytes(), &raw),
            XorDistance::ZERO
        );
    }

    #[test]
    fn ilog2_matches_highest_bit() {
        let mut a = [0u8; 32];
        a[0] = 0x80;
        let d = xor_distance(&a, &[0u8; 32]);
        assert_eq!(d.ilog2(), Some(255));
        assert_eq!(XorDistance::ZERO.ilog2(), None);
    }

    #[test]
    fn realm_key_namespaces_non_default_realms() {
        let key = [5u8; 32];
        let default_realm = RealmId::default();
        let realm = RealmId::new("ab".repeat(32)).unwrap();
        assert_eq!(realm_aware_key(&default_realm, &key), key);
        assert_ne!(realm_aware_key(&realm, &key), key);
    }

    quickcheck! {
        fn distance_is_symmetric(a: Vec<u8>, b: Vec<u8>) -> bool {
            xor_distance(&a, &b) == xor_distance(&b, &a)
        }

        fn distance_to_self_is_always_zero(a: Vec<u8>) -> bool {
            xor_distance(&a, &a) == XorDistance::ZERO
        }
    }
}
