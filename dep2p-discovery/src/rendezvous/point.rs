// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The rendezvous point: serves framed registration/discovery messages over
//! inbound streams and sweeps expired registrations periodically.

use super::store::{Registration, RendezvousConfig, RendezvousStore};
use crate::error::{DiscoveryError, Result};
use dep2p_protocol::endpoint::{Clock, RawStream};
use dep2p_protocol::messages::rendezvous::{
    read_frame, write_frame, Discover, DiscoverResponse, MessageType, Peer, Register,
    RegisterResponse, RendezvousMessage, ResponseStatus,
};
use dep2p_protocol::{Multiaddr, NodeId, PeerInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Pagination cookies are a 4-byte big-endian offset.
const COOKIE_LEN: usize = 4;

/// A rendezvous point serving one process.
pub struct RendezvousPoint {
    store: Mutex<RendezvousStore>,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    cleanup_interval: Duration,
}

impl RendezvousPoint {
    pub fn new(config: RendezvousConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let cleanup_interval = config.cleanup_interval;
        Arc::new(Self {
            store: Mutex::new(RendezvousStore::new(config, clock)),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            cleanup_interval,
        })
    }

    /// Starts the expiry sweep loop. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().expect("rendezvous shutdown lock") = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.cleanup_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = this.store.lock().expect("rendezvous store lock").cleanup_expired();
                        if removed > 0 {
                            debug!("Rendezvous sweep removed {removed} expired registrations");
                        }
                    }
                    _ = rx.changed() => return,
                }
            }
        });
        Ok(())
    }

    /// Stops the sweep loop. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Some(tx) = self
            .shutdown
            .lock()
            .expect("rendezvous shutdown lock")
            .take()
        {
            let _ = tx.send(true);
        }
        Ok(())
    }

    /// Serves one inbound stream until the remote closes it.
    pub async fn handle_stream<S: RawStream>(&self, stream: &mut S) -> Result<()> {
        loop {
            let body = match read_frame(stream).await {
                Ok(body) => body,
                // Remote hung up; a half-read frame is also the end of the
                // conversation.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let message = RendezvousMessage::decode_body(&body)?;
            let response = self.handle_message(message);
            if let Some(response) = response {
                write_frame(stream, &response.encode_body()).await?;
            }
        }
    }

    fn handle_message(&self, message: RendezvousMessage) -> Option<RendezvousMessage> {
        match MessageType::try_from(message.r#type) {
            Ok(MessageType::Register) => Some(self.on_register(message.register)),
            Ok(MessageType::Unregister) => {
                self.on_unregister(message.unregister);
                None
            }
            Ok(MessageType::Discover) => Some(self.on_discover(message.discover)),
            Ok(other) => {
                debug!("Rendezvous point ignoring {other:?} message");
                None
            }
            Err(_) => {
                debug!("Rendezvous point ignoring unknown message type {}", message.r#type);
                None
            }
        }
    }

    fn on_register(&self, register: Option<Register>) -> RendezvousMessage {
        let result = register
            .ok_or(DiscoveryError::MalformedMessage)
            .and_then(|register| {
                let peer = decode_peer(register.peer)?;
                let signed_record =
                    (!register.signed_record.is_empty()).then_some(register.signed_record);
                self.store
                    .lock()
                    .expect("rendezvous store lock")
                    .register(
                        &register.ns,
                        peer,
                        Duration::from_secs(register.ttl),
                        signed_record,
                    )
            });

        let response = match result {
            Ok(granted) => RegisterResponse {
                status: ResponseStatus::Ok as i32,
                status_text: String::new(),
                ttl: granted.as_secs(),
            },
            Err(err) => RegisterResponse {
                status: err.to_response_status() as i32,
                status_text: err.to_string(),
                ttl: 0,
            },
        };
        RendezvousMessage {
            r#type: MessageType::RegisterResponse as i32,
            register_response: Some(response),
            ..Default::default()
        }
    }

    fn on_unregister(&self, unregister: Option<dep2p_protocol::messages::rendezvous::Unregister>) {
        let Some(unregister) = unregister else {
            return;
        };
        let Ok(node) = NodeId::from_bytes(&unregister.id) else {
            return;
        };
        self.store
            .lock()
            .expect("rendezvous store lock")
            .unregister(&unregister.ns, &node);
    }

    fn on_discover(&self, discover: Option<Discover>) -> RendezvousMessage {
        let result = discover
            .ok_or(DiscoveryError::MalformedMessage)
            .and_then(|discover| {
                let offset = decode_cookie(&discover.cookie)?;
                let (registrations, next) = self
                    .store
                    .lock()
                    .expect("rendezvous store lock")
                    .discover(&discover.ns, discover.limit as usize, offset)?;
                Ok((registrations, next))
            });

        let response = match result {
            Ok((registrations, next)) => DiscoverResponse {
                status: ResponseStatus::Ok as i32,
                status_text: String::new(),
                registrations: registrations.into_iter().map(encode_registration).collect(),
                cookie: next.map(encode_cookie).unwrap_or_default(),
            },
            Err(err) => DiscoverResponse {
                status: err.to_response_status() as i32,
                status_text: err.to_string(),
                registrations: Vec::new(),
                cookie: Vec::new(),
            },
        };
        RendezvousMessage {
            r#type: MessageType::DiscoverResponse as i32,
            discover_response: Some(response),
            ..Default::default()
        }
    }
}

fn decode_peer(peer: Option<Peer>) -> Result<PeerInfo> {
    let peer = peer.ok_or(DiscoveryError::MalformedMessage)?;
    let id = NodeId::from_bytes(&peer.id)?;
    let mut addrs = Vec::with_capacity(peer.addrs.len());
    for addr in &peer.addrs {
        addrs.push(Multiaddr::parse(addr)?);
    }
    Ok(PeerInfo::new(id, addrs, "rendezvous")?)
}

fn encode_registration(registration: Registration) -> Register {
    Register {
        ns: registration.namespace,
        peer: Some(Peer {
            id: registration.peer.id.as_bytes().to_vec(),
            addrs: registration
                .peer
                .addrs
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }),
        ttl: registration.ttl.as_secs(),
        signed_record: registration.signed_record.unwrap_or_default(),
    }
}

fn decode_cookie(cookie: &[u8]) -> Result<usize> {
    if cookie.is_empty() {
        return Ok(0);
    }
    let bytes: [u8; COOKIE_LEN] = cookie
        .try_into()
        .map_err(|_| DiscoveryError::InvalidCookie)?;
    Ok(u32::from_be_bytes(bytes) as usize)
}

fn encode_cookie(offset: usize) -> Vec<u8> {
    (offset as u32).to_be_bytes().to_vec()
}
