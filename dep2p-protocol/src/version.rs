// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Protocol identifiers and discovery namespace keys.

use crate::node_id::RealmId;

/// Version segment shared by every dep2p discovery key.
pub const DISCOVERY_KEY_VERSION: &str = "dep2p/v1";

/// Prefix of every dep2p stream protocol.
pub const PROTOCOL_PREFIX: &str = "/dep2p";

/// Stream protocol for relay hops through a realm gateway.
pub const GATEWAY_RELAY_PROTOCOL: &str = "/dep2p/sys/gateway/relay/1.0.0";
/// Stream protocol for latency probes: 32 bytes out, the same 32 bytes back.
pub const PING_PROTOCOL: &str = "/dep2p/sys/ping/1.0.0";
/// Stream protocol for the challenge/response auth exchange.
pub const AUTH_PROTOCOL: &str = "/dep2p/sys/auth/1.0.0";
/// Stream protocol spoken to rendezvous points.
pub const RENDEZVOUS_PROTOCOL: &str = "/dep2p/sys/rendezvous/1.0.0";

/// Well-known system namespaces.
pub const NS_BOOTSTRAP: &str = "bootstrap";
pub const NS_RELAY: &str = "relay";

/// Namespaces carrying this prefix are forced into system scope.
pub const SYS_NAMESPACE_PREFIX: &str = "sys:";

/// Key for a system-scoped namespace: `dep2p/v1/sys/<ns>`.
pub fn sys_namespace_key(ns: &str) -> String {
    format!("{DISCOVERY_KEY_VERSION}/sys/{ns}")
}

/// Key for a realm-scoped namespace: `dep2p/v1/realm/<realm>/<ns>`.
pub fn realm_namespace_key(realm: &RealmId, ns: &str) -> String {
    format!("{DISCOVERY_KEY_VERSION}/realm/{}/{ns}", realm.as_str())
}

/// Prefix accepted by a realm gateway for realm-internal protocols.
pub fn realm_protocol_prefix(realm: &RealmId) -> String {
    format!("{PROTOCOL_PREFIX}/realm/{}/", realm.as_str())
}

/// Prefix accepted by a realm gateway for application protocols.
pub fn app_protocol_prefix(realm: &RealmId) -> String {
    format!("{PROTOCOL_PREFIX}/app/{}/", realm.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_keys_have_the_documented_shape() {
        let realm = RealmId::new("ab".repeat(32)).unwrap();
        assert_eq!(sys_namespace_key("relay"), "dep2p/v1/sys/relay");
        assert_eq!(
            realm_namespace_key(&realm, "chat"),
            format!("dep2p/v1/realm/{}/chat", realm.as_str())
        );
    }
}
