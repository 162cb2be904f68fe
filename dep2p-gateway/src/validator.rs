// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The protocol gate in front of the relay.
//!
//! A gateway forwards `/dep2p/realm/<realm>/*` and `/dep2p/app/<realm>/*`
//! for its own realm only. `/dep2p/sys/*` is explicitly refused; system
//! protocols are handled elsewhere.

use crate::error::{GatewayError, Result};
use dep2p_protocol::RealmId;

const REALM_PREFIX: &str = "/dep2p/realm/";
const APP_PREFIX: &str = "/dep2p/app/";
const SYS_PREFIX: &str = "/dep2p/sys/";

/// Checks that `protocol` is relayable by a gateway serving `realm`.
pub fn validate_protocol(protocol: &str, realm: &RealmId) -> Result<()> {
    if protocol.starts_with(SYS_PREFIX) {
        return Err(GatewayError::InvalidProtocol);
    }
    let rest = if let Some(rest) = protocol.strip_prefix(REALM_PREFIX) {
        rest
    } else if let Some(rest) = protocol.strip_prefix(APP_PREFIX) {
        rest
    } else {
        return Err(GatewayError::InvalidProtocol);
    };

    let Some(protocol_realm) = rest.split('/').next().filter(|seg| !seg.is_empty()) else {
        return Err(GatewayError::InvalidProtocol);
    };
    if protocol_realm != realm.as_str() {
        return Err(GatewayError::RealmMismatch);
    }
    Ok(())
}

/// Stateless wrapper carrying the served realm.
#[derive(Clone, Debug)]
pub struct ProtocolValidator {
    realm: RealmId,
}

impl ProtocolValidator {
    pub fn new(realm: RealmId) -> Self {
        Self { realm }
    }

    pub fn validate(&self, protocol: &str) -> Result<()> {
        validate_protocol(protocol, &self.realm)
    }

    pub fn realm(&self) -> &RealmId {
        &self.realm
    }
}
