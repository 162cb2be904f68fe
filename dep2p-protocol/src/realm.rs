// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Realm key derivation.
//!
//! Both derivations are deterministic: the same PSK produces byte-identical
//! output across runs, hosts and implementations. Empty PSKs pass through as
//! empty outputs rather than errors; consumers that need a real secret
//! enforce [`MIN_PSK_LEN`] themselves.

use crate::node_id::RealmId;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// HKDF salt for deriving the realm identifier.
pub const REALM_ID_SALT: &[u8] = b"dep2p-realm-id-v1";
/// HKDF salt for deriving the realm auth key.
pub const AUTH_KEY_SALT: &[u8] = b"dep2p-auth-key-v1";
/// Minimum PSK length accepted by secret consumers (the authenticator).
pub const MIN_PSK_LEN: usize = 16;
/// Output length of both derivations.
pub const DERIVED_KEY_LEN: usize = 32;

/// Symmetric realm auth key. Never transmitted; zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthKey(Vec<u8>);

impl AuthKey {
    /// An empty key, produced by an empty PSK. Cannot authenticate anything.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log key material.
        write!(f, "AuthKey(len={})", self.0.len())
    }
}

/// Derives the realm identifier from a pre-shared key.
///
/// `HKDF-SHA256(psk, salt = "dep2p-realm-id-v1", info = SHA256(psk))`,
/// truncated to 32 bytes and lowercase hex encoded (64 characters).
pub fn derive_realm_id(psk: &[u8]) -> RealmId {
    if psk.is_empty() {
        return RealmId::default();
    }

    let info = Sha256::digest(psk);
    let hk = Hkdf::<Sha256>::new(Some(REALM_ID_SALT), psk);
    let mut okm = [0u8; DERIVED_KEY_LEN];
    hk.expand(&info, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    RealmId::new(hex::encode(okm)).expect("hex::encode yields 64 hex chars")
}

/// Derives the symmetric auth key for a realm from its pre-shared key.
///
/// `HKDF-SHA256(psk, salt = "dep2p-auth-key-v1", info = RealmID)` where the
/// info is the 64-char hex realm id derived from the same PSK.
pub fn derive_auth_key(psk: &[u8]) -> AuthKey {
    if psk.is_empty() {
        return AuthKey::empty();
    }

    let realm_id = derive_realm_id(psk);
    let hk = Hkdf::<Sha256>::new(Some(AUTH_KEY_SALT), psk);
    let mut okm = vec![0u8; DERIVED_KEY_LEN];
    hk.expand(realm_id.as_str().as_bytes(), &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    AuthKey(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn realm_id_is_deterministic_and_64_hex() {
        let psk = b"test-psk-key-123456";
        let first = derive_realm_id(psk);
        let second = derive_realm_id(psk);
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert!(first.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_psk_yields_empty_outputs() {
        assert!(derive_realm_id(b"").is_default());
        assert!(derive_auth_key(b"").is_empty());
    }

    #[test]
    fn auth_key_differs_from_realm_id_material() {
        let psk = b"test-psk-key-123456";
        let realm = derive_realm_id(psk);
        let key = derive_auth_key(psk);
        assert_eq!(key.as_bytes().len(), DERIVED_KEY_LEN);
        assert_ne!(hex::encode(key.as_bytes()), realm.as_str());
    }

    quickcheck! {
        fn distinct_psks_yield_distinct_realms(a: Vec<u8>, b: Vec<u8>) -> bool {
            if a == b || a.is_empty() || b.is_empty() {
                return true;
            }
            derive_realm_id(&a) != derive_realm_id(&b)
        }
    }
}
