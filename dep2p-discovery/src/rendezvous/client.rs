// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Rendezvous client: registers the local node with known points and
//! discovers namespace members, rotating across points on failure.

use crate::backend::{Discoverer, DiscoveryBackend, NamespaceDiscoverer};
use crate::error::{DiscoveryError, Result};
use crate::types::DiscoverySource;
use async_trait::async_trait;
use dep2p_protocol::endpoint::Endpoint;
use dep2p_protocol::messages::rendezvous::{
    read_frame, write_frame, Discover, MessageType, Peer, Register, RendezvousMessage,
    ResponseStatus, Unregister,
};
use dep2p_protocol::version::RENDEZVOUS_PROTOCOL;
use dep2p_protocol::{Multiaddr, NodeId, PeerInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Source tag carried by rendezvous results.
const RENDEZVOUS_SOURCE: &str = "rendezvous";

/// Client-side rendezvous discoverer.
pub struct RendezvousDiscoverer {
    endpoint: Arc<dyn Endpoint>,
    points: Vec<NodeId>,
    next_point: AtomicUsize,
    /// Shutdown handles of the per-key renewal tasks.
    renewals: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl RendezvousDiscoverer {
    pub fn new(endpoint: Arc<dyn Endpoint>, points: Vec<NodeId>) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            points,
            next_point: AtomicUsize::new(0),
            renewals: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the local node under `key` and keeps the registration alive
    /// by re-registering at half the granted TTL.
    pub async fn register(self: &Arc<Self>, key: &str, ttl: Duration) -> Result<Duration> {
        let granted = self.register_once(key, ttl).await?;
        self.spawn_renewal(key.to_string(), ttl, granted);
        Ok(granted)
    }

    /// Withdraws a registration and stops its renewal task.
    pub async fn unregister(&self, key: &str) -> Result<()> {
        if let Some(tx) = self
            .renewals
            .lock()
            .expect("rendezvous renewals lock")
            .remove(key)
        {
            let _ = tx.send(true);
        }

        let message = RendezvousMessage {
            r#type: MessageType::Unregister as i32,
            unregister: Some(Unregister {
                ns: key.to_string(),
                id: self.endpoint.local_node().as_bytes().to_vec(),
            }),
            ..Default::default()
        };
        let point = self.pick_point()?;
        let mut stream = self
            .endpoint
            .open_stream(&point, RENDEZVOUS_PROTOCOL)
            .await?;
        write_frame(&mut stream, &message.encode_body()).await?;
        Ok(())
    }

    /// Discovers peers registered under `key`, walking pagination cookies
    /// until `limit` results (zero = every page).
    pub async fn discover(&self, key: &str, limit: usize) -> Result<Vec<PeerInfo>> {
        let point = self.pick_point()?;
        let mut stream = self
            .endpoint
            .open_stream(&point, RENDEZVOUS_PROTOCOL)
            .await?;

        let mut out: Vec<PeerInfo> = Vec::new();
        let mut cookie: Vec<u8> = Vec::new();
        loop {
            let remaining = if limit == 0 { 0 } else { limit - out.len() };
            let message = RendezvousMessage {
                r#type: MessageType::Discover as i32,
                discover: Some(Discover {
                    ns: key.to_string(),
                    limit: remaining as u64,
                    cookie: cookie.clone(),
                }),
                ..Default::default()
            };
            write_frame(&mut stream, &message.encode_body()).await?;
            let response = RendezvousMessage::decode_body(&read_frame(&mut stream).await?)?;
            let Some(discover_response) = response.discover_response else {
                return Err(DiscoveryError::MalformedMessage);
            };
            check_status(discover_response.status, &discover_response.status_text)?;

            for registration in discover_response.registrations {
                if let Ok(peer) = registration
                    .peer
                    .ok_or(DiscoveryError::MalformedMessage)
                    .and_then(decode_peer)
                {
                    out.push(peer);
                }
            }

            cookie = discover_response.cookie;
            let done = cookie.is_empty() || (limit > 0 && out.len() >= limit);
            if done {
                break;
            }
        }
        if limit > 0 {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Stops every renewal task.
    pub fn stop(&self) {
        let mut renewals = self.renewals.lock().expect("rendezvous renewals lock");
        for (_, tx) in renewals.drain() {
            let _ = tx.send(true);
        }
    }

    async fn register_once(&self, key: &str, ttl: Duration) -> Result<Duration> {
        let local = self.endpoint.local_node();
        let addrs = self.endpoint.local_addrs();
        if addrs.is_empty() {
            return Err(DiscoveryError::InvalidAddressCount {
                max: dep2p_protocol::MAX_ADDRS_PER_PEER,
            });
        }

        let message = RendezvousMessage {
            r#type: MessageType::Register as i32,
            register: Some(Register {
                ns: key.to_string(),
                peer: Some(Peer {
                    id: local.as_bytes().to_vec(),
                    addrs: addrs.iter().map(|a| a.to_string()).collect(),
                }),
                ttl: ttl.as_secs(),
                signed_record: Vec::new(),
            }),
            ..Default::default()
        };

        // Rotate through the known points until one accepts.
        let mut last_err = DiscoveryError::NoRendezvousPoints;
        for _ in 0..self.points.len().max(1) {
            let point = self.pick_point()?;
            match self.register_with_point(&point, &message).await {
                Ok(granted) => return Ok(granted),
                Err(err) => {
                    debug!("Rendezvous registration with {point:?} failed: {err}");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn register_with_point(
        &self,
        point: &NodeId,
        message: &RendezvousMessage,
    ) -> Result<Duration> {
        let mut stream = self
            .endpoint
            .open_stream(point, RENDEZVOUS_PROTOCOL)
            .await?;
        write_frame(&mut stream, &message.encode_body()).await?;
        let response = RendezvousMessage::decode_body(&read_frame(&mut stream).await?)?;
        let Some(register_response) = response.register_response else {
            return Err(DiscoveryError::MalformedMessage);
        };
        check_status(register_response.status, &register_response.status_text)?;
        Ok(Duration::from_secs(register_response.ttl))
    }

    fn spawn_renewal(self: &Arc<Self>, key: String, requested_ttl: Duration, granted: Duration) {
        let (tx, mut rx) = watch::channel(false);
        let previous = self
            .renewals
            .lock()
            .expect("rendezvous renewals lock")
            .insert(key.clone(), tx);
        if let Some(previous) = previous {
            let _ = previous.send(true);
        }

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let mut period = granted / 2;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        match this.register_once(&key, requested_ttl).await {
                            Ok(granted) => period = granted / 2,
                            Err(err) => {
                                warn!("Rendezvous renewal of {key} failed: {err}");
                            }
                        }
                    }
                    _ = rx.changed() => {
                        trace!("Rendezvous renewal of {key} stopped");
                        return;
                    }
                }
            }
        });
    }

    fn pick_point(&self) -> Result<NodeId> {
        if self.points.is_empty() {
            return Err(DiscoveryError::NoRendezvousPoints);
        }
        let idx = self.next_point.fetch_add(1, Ordering::Relaxed) % self.points.len();
        Ok(self.points[idx].clone())
    }
}

impl DiscoveryBackend for RendezvousDiscoverer {
    fn name(&self) -> &'static str {
        "rendezvous"
    }

    fn as_discoverer(&self) -> Option<&dyn Discoverer> {
        Some(self)
    }

    fn as_namespace_discoverer(&self) -> Option<&dyn NamespaceDiscoverer> {
        Some(self)
    }
}

#[async_trait]
impl Discoverer for RendezvousDiscoverer {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Rendezvous
    }

    async fn discover(&self, key: &str, limit: usize) -> Result<Vec<PeerInfo>> {
        RendezvousDiscoverer::discover(self, key, limit).await
    }
}

#[async_trait]
impl NamespaceDiscoverer for RendezvousDiscoverer {
    async fn discover_namespace(&self, key: &str, limit: usize) -> Result<Vec<PeerInfo>> {
        RendezvousDiscoverer::discover(self, key, limit).await
    }

    async fn register_namespace(&self, key: &str, ttl: Duration) -> Result<Duration> {
        // Arc-less trait surface: renewal tasks need the Arc, so the umbrella
        // object registered with the coordinator must be the Arc'd client.
        self.register_once(key, ttl).await
    }

    async fn unregister_namespace(&self, key: &str) -> Result<()> {
        self.unregister(key).await
    }
}

fn decode_peer(peer: Peer) -> Result<PeerInfo> {
    let id = NodeId::from_bytes(&peer.id)?;
    let mut addrs = Vec::with_capacity(peer.addrs.len());
    for addr in &peer.addrs {
        addrs.push(Multiaddr::parse(addr)?);
    }
    Ok(PeerInfo::new(id, addrs, RENDEZVOUS_SOURCE)?)
}

fn check_status(status: i32, text: &str) -> Result<()> {
    match ResponseStatus::try_from(status) {
        Ok(ResponseStatus::Ok) => Ok(()),
        Ok(status) => Err(DiscoveryError::RendezvousStatus {
            status,
            text: text.to_string(),
        }),
        Err(_) => Err(DiscoveryError::MalformedMessage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::{RendezvousConfig, RendezvousPoint};
    use dep2p_protocol::endpoint::{BoxStream, SystemClock};
    use std::io;

    /// Endpoint whose streams land directly on an in-process point.
    struct PointEndpoint {
        local: NodeId,
        addrs: Vec<Multiaddr>,
        point: Arc<RendezvousPoint>,
    }

    #[async_trait]
    impl Endpoint for PointEndpoint {
        fn local_node(&self) -> NodeId {
            self.local.clone()
        }

        fn local_addrs(&self) -> Vec<Multiaddr> {
            self.addrs.clone()
        }

        async fn open_stream(&self, _node: &NodeId, protocol: &str) -> io::Result<BoxStream> {
            assert_eq!(protocol, RENDEZVOUS_PROTOCOL);
            let (client, mut server) = tokio::io::duplex(64 * 1024);
            let point = Arc::clone(&self.point);
            let _handle = tokio::spawn(async move {
                let _ = point.handle_stream(&mut server).await;
            });
            Ok(Box::new(client))
        }

        async fn dial(&self, _node: &NodeId, _addrs: &[Multiaddr]) -> io::Result<()> {
            Ok(())
        }

        fn connected_nodes(&self) -> Vec<NodeId> {
            Vec::new()
        }

        fn remote_addrs(&self, _node: &NodeId) -> Vec<Multiaddr> {
            Vec::new()
        }
    }

    fn client_with_point() -> (Arc<RendezvousDiscoverer>, Arc<RendezvousPoint>) {
        let point = RendezvousPoint::new(RendezvousConfig::default(), Arc::new(SystemClock));
        let local = NodeId::from_bytes(&[1u8; 32]).unwrap();
        let endpoint = Arc::new(PointEndpoint {
            local: local.clone(),
            addrs: vec![Multiaddr::parse("/ip4/127.0.0.1/tcp/4001").unwrap()],
            point: Arc::clone(&point),
        });
        let point_id = NodeId::from_bytes(&[9u8; 32]).unwrap();
        (
            RendezvousDiscoverer::new(endpoint, vec![point_id]),
            point,
        )
    }

    #[tokio::test]
    async fn register_discover_unregister_round_trip() {
        let (client, _point) = client_with_point();

        let granted = client
            .register("dep2p/v1/sys/chat", Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(granted, Duration::from_secs(120));

        let found = client.discover("dep2p/v1/sys/chat", 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, NodeId::from_bytes(&[1u8; 32]).unwrap());

        client.unregister("dep2p/v1/sys/chat").await.unwrap();
        // The unregister frame is fire-and-forget; give the point a moment.
        let mut found = client.discover("dep2p/v1/sys/chat", 0).await.unwrap();
        for _ in 0..20 {
            if found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            found = client.discover("dep2p/v1/sys/chat", 0).await.unwrap();
        }
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn discover_on_empty_namespace_is_empty() {
        let (client, _point) = client_with_point();
        let found = client.discover("dep2p/v1/sys/none", 5).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn no_points_is_an_error() {
        let (_client, point) = client_with_point();
        let endpoint = Arc::new(PointEndpoint {
            local: NodeId::from_bytes(&[1u8; 32]).unwrap(),
            addrs: vec![Multiaddr::parse("/ip4/127.0.0.1/tcp/4001").unwrap()],
            point,
        });
        let client = RendezvousDiscoverer::new(endpoint, Vec::new());
        assert!(matches!(
            client.discover("ns", 0).await,
            Err(DiscoveryError::NoRendezvousPoints)
        ));
    }
}
