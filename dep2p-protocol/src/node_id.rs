// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Length of a [`NodeId`] in bytes.
pub const NODE_ID_LEN: usize = 32;

/// A unique identifier for a node in the network,
/// by which we can know their location in the xor space.
///
/// Opaque 32 bytes, assigned at identity boot and immutable afterwards.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Builds a `NodeId` from exactly [`NODE_ID_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NODE_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| Error::InvalidNodeIdLength {
                    expected: NODE_ID_LEN,
                    got: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Returns this NodeId as bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Lowercase hex form, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Base58 (bitcoin alphabet) form.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidNodeIdEncoding(s.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| Error::InvalidNodeIdEncoding(s.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Parses either text form. Hex is tried first as it is unambiguous in length.
    pub fn from_str_any(s: &str) -> Result<Self> {
        if s.len() == NODE_ID_LEN * 2 {
            if let Ok(id) = Self::from_hex(s) {
                return Ok(id);
            }
        }
        Self::from_base58(s)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The first six hex chars are enough to tell peers apart in logs.
        write!(f, "NodeId({}..)", &self.to_hex()[..6])
    }
}

/// Identifier of a realm, a logical subnet of peers sharing a PSK.
///
/// Either empty (the default/system realm) or 64 lowercase hex characters
/// derived from the realm PSK. See [`crate::realm::derive_realm_id`].
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RealmId(String);

impl RealmId {
    /// Wraps an already-derived realm id string.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Ok(Self(id));
        }
        if id.len() != 64 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidRealmId);
        }
        Ok(Self(id.to_lowercase()))
    }

    /// The default realm is the public/system realm, denoted by the empty id.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<default>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "RealmId(<default>)")
        } else {
            write!(f, "RealmId({}..)", &self.0[..6])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_text_forms_round_trip() -> eyre::Result<()> {
        let id = NodeId::from_bytes(&[7u8; 32])?;
        assert_eq!(NodeId::from_hex(&id.to_hex())?, id);
        assert_eq!(NodeId::from_base58(&id.to_base58())?, id);
        assert_eq!(NodeId::from_str_any(&id.to_hex())?, id);
        assert_eq!(NodeId::from_str_any(&id.to_base58())?, id);
        Ok(())
    }

    #[test]
    fn node_id_rejects_wrong_length() {
        assert!(matches!(
            NodeId::from_bytes(&[1u8; 16]),
            Err(Error::InvalidNodeIdLength { got: 16, .. })
        ));
    }

    #[test]
    fn realm_id_validates_shape() {
        assert!(RealmId::new("").is_ok());
        assert!(RealmId::new("ab".repeat(32)).is_ok());
        assert!(RealmId::new("xyz").is_err());
        assert!(RealmId::new("g".repeat(64)).is_err());
    }
}
