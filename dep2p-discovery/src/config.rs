// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{DiscoveryError, Result};
use std::time::Duration;

/// Coordinator configuration. The defaults are the protocol defaults; most
/// deployments never override anything here.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Base discovery polling interval.
    pub base_interval: Duration,
    /// Floor for the dynamic interval, also used in emergency recovery.
    pub min_interval: Duration,
    /// Ceiling for the dynamic interval.
    pub max_interval: Duration,
    /// Peer count the dynamic interval steers towards.
    pub target_peer_count: usize,
    /// Cadence of the local PeerRecord announce refresh.
    pub refresh_interval: Duration,
    /// Cadence of the known-peer cleanup sweep.
    pub cleanup_interval: Duration,
    /// Known peers idle longer than this are dropped by the sweep.
    pub max_peer_idle: Duration,
    /// Cadence of the service-registration renewal loop.
    pub renewal_interval: Duration,
    /// Budget for a single backend within one `discover` call.
    pub per_source_timeout: Duration,
    /// Default budget for a whole `discover` call.
    pub query_timeout: Duration,
    /// Default budget for `find_peer`.
    pub find_peer_timeout: Duration,
    /// Default TTL for service registrations.
    pub rendezvous_default_ttl: Duration,
    /// Upper bound applied to requested registration TTLs.
    pub rendezvous_max_ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(5 * 60),
            target_peer_count: 50,
            refresh_interval: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            max_peer_idle: Duration::from_secs(60 * 60),
            renewal_interval: Duration::from_secs(60),
            per_source_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            find_peer_timeout: Duration::from_secs(30),
            rendezvous_default_ttl: Duration::from_secs(2 * 60 * 60),
            rendezvous_max_ttl: Duration::from_secs(72 * 60 * 60),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_peer_count == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "target_peer_count must be non-zero".to_string(),
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(DiscoveryError::InvalidConfig(
                "min_interval exceeds max_interval".to_string(),
            ));
        }
        if self.base_interval.is_zero()
            || self.query_timeout.is_zero()
            || self.per_source_timeout.is_zero()
            || self.find_peer_timeout.is_zero()
        {
            return Err(DiscoveryError::InvalidConfig(
                "intervals and timeouts must be non-zero".to_string(),
            ));
        }
        if self.rendezvous_default_ttl > self.rendezvous_max_ttl {
            return Err(DiscoveryError::InvalidConfig(
                "rendezvous_default_ttl exceeds rendezvous_max_ttl".to_string(),
            ));
        }
        Ok(())
    }
}
