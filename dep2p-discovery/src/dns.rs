// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! `dnsaddr` TXT discovery.
//!
//! Contact domains publish TXT records at `_dnsaddr.<domain>`, each of the
//! form `dnsaddr=<multiaddr>`. Records either carry a full address ending in
//! `/p2p/<NodeId>` or delegate to another domain via `/dnsaddr/<domain>`,
//! resolved recursively up to a fixed depth.

use crate::backend::{Discoverer, DiscoveryBackend};
use crate::error::{DiscoveryError, Result};
use crate::types::DiscoverySource;
use async_trait::async_trait;
use dep2p_protocol::{Multiaddr, NodeId, PeerInfo};
use futures::future::BoxFuture;
use futures::FutureExt;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source tag carried by DNS results.
const DNS_SOURCE: &str = "dns";
/// Prefix required on every TXT record.
const DNSADDR_PREFIX: &str = "dnsaddr=";

/// DNS backend configuration.
#[derive(Clone, Debug)]
pub struct DnsConfig {
    /// Contact domains to resolve.
    pub domains: Vec<String>,
    /// Per-domain cache lifetime.
    pub cache_ttl: Duration,
    /// Max depth of nested `/dnsaddr/` delegation.
    pub max_depth: usize,
    /// Budget for a single TXT query.
    pub query_timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            cache_ttl: Duration::from_secs(5 * 60),
            max_depth: 3,
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Resolves TXT records. The production impl speaks to the system resolver;
/// tests inject a static map.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// hickory-backed system resolver.
pub struct SystemTxtResolver {
    resolver: TokioAsyncResolver,
}

impl SystemTxtResolver {
    pub fn new(query_timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = query_timeout;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

#[async_trait]
impl TxtResolver for SystemTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .txt_lookup(name.to_string())
            .await
            .map_err(|err| DiscoveryError::DnsLookup(err.to_string()))?;
        let records = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<String>()
            })
            .collect();
        Ok(records)
    }
}

/// `dnsaddr` discoverer with a per-domain TTL cache.
pub struct DnsDiscoverer {
    config: DnsConfig,
    resolver: Box<dyn TxtResolver>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    peers: Vec<PeerInfo>,
    expires_at: Instant,
}

impl DnsDiscoverer {
    pub fn new(config: DnsConfig) -> Self {
        let resolver = Box::new(SystemTxtResolver::new(config.query_timeout));
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(config: DnsConfig, resolver: Box<dyn TxtResolver>) -> Self {
        Self {
            config,
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves one contact domain to peers, serving from cache when fresh.
    /// Results are copies; the cache is never handed out by reference.
    pub async fn resolve(&self, domain: &str) -> Result<Vec<PeerInfo>> {
        validate_domain(domain)?;

        if let Some(peers) = self.cached(domain) {
            trace!("dnsaddr cache hit for {domain}");
            return Ok(peers);
        }

        let peers = self.resolve_domain(domain, 0).await?;
        if peers.is_empty() {
            return Err(DiscoveryError::NoRecordsFound(domain.to_string()));
        }

        let mut cache = self.cache.lock().expect("dns cache lock");
        cache.insert(
            domain.to_string(),
            CacheEntry {
                peers: peers.clone(),
                expires_at: Instant::now() + self.config.cache_ttl,
            },
        );
        Ok(peers)
    }

    /// Accumulates peers across the configured domains until at least `count`
    /// have been collected. A domain that resolves to several peers at once
    /// can overshoot `count`; callers get everything collected so far.
    pub async fn find_bootstrap_nodes(&self, count: usize) -> Result<Vec<PeerInfo>> {
        let mut out: Vec<PeerInfo> = Vec::new();
        for domain in &self.config.domains {
            match self.resolve(domain).await {
                Ok(peers) => out.extend(peers),
                Err(err) => warn!("dnsaddr resolution of {domain} failed: {err}"),
            }
            if count > 0 && out.len() >= count {
                break;
            }
        }
        Ok(out)
    }

    fn cached(&self, domain: &str) -> Option<Vec<PeerInfo>> {
        let mut cache = self.cache.lock().expect("dns cache lock");
        match cache.get(domain) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.peers.clone()),
            Some(_) => {
                let _ = cache.remove(domain);
                None
            }
            None => None,
        }
    }

    fn resolve_domain<'a>(
        &'a self,
        domain: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<PeerInfo>>> {
        async move {
            if depth >= self.config.max_depth {
                return Err(DiscoveryError::MaxDepthExceeded(self.config.max_depth));
            }

            let name = format!("_dnsaddr.{domain}");
            let records = self.resolver.lookup_txt(&name).await?;

            let mut peers: HashMap<NodeId, PeerInfo> = HashMap::new();
            for record in records {
                match self.parse_record(&record, depth).await {
                    Ok(found) => {
                        for peer in found {
                            match peers.get_mut(&peer.id) {
                                Some(existing) => existing.addrs.extend(peer.addrs),
                                None => {
                                    let _ = peers.insert(peer.id.clone(), peer);
                                }
                            }
                        }
                    }
                    // A bad record skips itself, never the whole domain.
                    Err(err) => debug!("Skipping dnsaddr record {record:?}: {err}"),
                }
            }
            Ok(peers.into_values().collect())
        }
        .boxed()
    }

    async fn parse_record(&self, record: &str, depth: usize) -> Result<Vec<PeerInfo>> {
        let value = record
            .strip_prefix(DNSADDR_PREFIX)
            .ok_or_else(|| DiscoveryError::InvalidDnsAddr(record.to_string()))?;
        let addr = Multiaddr::parse(value)
            .map_err(|_| DiscoveryError::InvalidDnsAddr(record.to_string()))?;

        if let Some(nested) = addr.dnsaddr_domain() {
            validate_domain(nested)?;
            return self.resolve_domain(nested, depth + 1).await;
        }

        let id = addr
            .node_id()
            .ok_or_else(|| DiscoveryError::InvalidDnsAddr(record.to_string()))?;
        Ok(vec![PeerInfo::new(id, vec![addr], DNS_SOURCE)?])
    }
}

impl DiscoveryBackend for DnsDiscoverer {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        Some(self)
    }
}

#[async_trait]
impl Discoverer for DnsDiscoverer {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Provider
    }

    async fn discover(&self, _key: &str, limit: usize) -> Result<Vec<PeerInfo>> {
        let mut peers = self.find_bootstrap_nodes(limit).await?;
        if limit > 0 {
            peers.truncate(limit);
        }
        Ok(peers)
    }
}

/// RFC-shaped domain validation: 253 chars total, labels of 1..=63 chars,
/// alphanumeric first character, `[A-Za-z0-9-]` afterwards.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > 253 {
        return Err(DiscoveryError::InvalidDomain(domain.to_string()));
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(DiscoveryError::InvalidDomain(domain.to_string()));
        }
        let first = label.as_bytes()[0];
        if !first.is_ascii_alphanumeric() {
            return Err(DiscoveryError::InvalidDomain(domain.to_string()));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(DiscoveryError::InvalidDomain(domain.to_string()));
        }
    }
    Ok(())
}
