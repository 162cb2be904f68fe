// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Relay session execution: two copy loops joined at the hip.
//!
//! Every byte read from one side is written to the other before the session
//! can end. The first error (or the first clean EOF) terminates both
//! directions; byte counters are atomic and monotonically non-decreasing.

use crate::error::{GatewayError, Result};
use crate::limiter::BandwidthLimiter;
use dep2p_protocol::endpoint::BoxStream;
use dep2p_protocol::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

/// Copy buffer per direction.
pub const RELAY_BUFFER_LEN: usize = 32 * 1024;

/// One relayed stream pairing.
pub struct RelaySession {
    pub id: u64,
    pub source: NodeId,
    pub target: NodeId,
    pub protocol: String,
    pub start_time: Instant,
    end_time: Mutex<Option<Instant>>,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
    closed: AtomicBool,
}

impl RelaySession {
    fn new(id: u64, source: NodeId, target: NodeId, protocol: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            source,
            target,
            protocol,
            start_time: Instant::now(),
            end_time: Mutex::new(None),
            bytes_sent: AtomicU64::new(0),
            bytes_recv: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Bytes copied source -> target.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// Bytes copied target -> source.
    pub fn bytes_recv(&self) -> u64 {
        self.bytes_recv.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn duration(&self) -> Duration {
        match *self.end_time.lock().expect("session end lock") {
            Some(end) => end - self.start_time,
            None => self.start_time.elapsed(),
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.end_time.lock().expect("session end lock") = Some(Instant::now());
        }
    }
}

/// Runs relay sessions under a shared bandwidth budget.
pub struct RelayService {
    limiter: Arc<BandwidthLimiter>,
    /// Sessions end when either stream does; this additionally bounds them.
    max_relay_duration: Option<Duration>,
    sessions: Mutex<HashMap<u64, Arc<RelaySession>>>,
    next_id: AtomicU64,
}

impl RelayService {
    pub fn new(limiter: Arc<BandwidthLimiter>, max_relay_duration: Option<Duration>) -> Self {
        Self {
            limiter,
            max_relay_duration,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new session.
    pub fn open_session(
        &self,
        source: NodeId,
        target: NodeId,
        protocol: impl Into<String>,
    ) -> Arc<RelaySession> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = RelaySession::new(id, source, target, protocol.into());
        let _ = self
            .sessions
            .lock()
            .expect("relay sessions lock")
            .insert(id, Arc::clone(&session));
        session
    }

    pub fn session(&self, id: u64) -> Option<Arc<RelaySession>> {
        self.sessions
            .lock()
            .expect("relay sessions lock")
            .get(&id)
            .cloned()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .expect("relay sessions lock")
            .values()
            .filter(|session| !session.is_closed())
            .count()
    }

    /// Drops closed sessions from the registry. Returns the count removed.
    pub fn prune_closed(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("relay sessions lock");
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_closed());
        before - sessions.len()
    }

    /// Drives both copy directions until one side closes or errors. The
    /// first error wins; a clean EOF on either side is normal termination.
    pub async fn transfer(
        &self,
        session: &Arc<RelaySession>,
        inbound: BoxStream,
        outbound: BoxStream,
    ) -> Result<()> {
        let (inbound_read, inbound_write) = tokio::io::split(inbound);
        let (outbound_read, outbound_write) = tokio::io::split(outbound);

        let forward = copy_direction(
            inbound_read,
            outbound_write,
            Arc::clone(&self.limiter),
            Arc::clone(session),
            Direction::Send,
        );
        let backward = copy_direction(
            outbound_read,
            inbound_write,
            Arc::clone(&self.limiter),
            Arc::clone(session),
            Direction::Recv,
        );

        let both = async {
            tokio::select! {
                result = forward => result,
                result = backward => result,
            }
        };

        let outcome = match self.max_relay_duration {
            Some(bound) => match tokio::time::timeout(bound, both).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::RelayDurationExceeded),
            },
            None => both.await,
        };

        session.mark_closed();
        outcome
    }
}

enum Direction {
    Send,
    Recv,
}

/// One copy loop: read, take bandwidth tokens, write it all out, count it.
async fn copy_direction(
    mut reader: ReadHalf<BoxStream>,
    mut writer: WriteHalf<BoxStream>,
    limiter: Arc<BandwidthLimiter>,
    session: Arc<RelaySession>,
    direction: Direction,
) -> Result<()> {
    let mut buffer = vec![0u8; RELAY_BUFFER_LEN];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            // EOF: flush what we owe and finish cleanly.
            writer.flush().await?;
            return Ok(());
        }

        let _token = limiter.acquire(read as u64).await?;
        writer.write_all(&buffer[..read]).await?;

        let counter = match direction {
            Direction::Send => &session.bytes_sent,
            Direction::Recv => &session.bytes_recv,
        };
        let _ = counter.fetch_add(read as u64, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(n: u8) -> NodeId {
        NodeId::from_bytes(&[n; 32]).unwrap()
    }

    fn service() -> RelayService {
        RelayService::new(Arc::new(BandwidthLimiter::new()), None)
    }

    #[tokio::test]
    async fn bytes_flow_in_both_directions() {
        let service = service();
        let session = service.open_session(node_id(1), node_id(2), "/dep2p/app/x/chat");

        // inbound_remote <-> inbound (gateway side), outbound <-> outbound_remote.
        let (inbound, mut inbound_remote) = tokio::io::duplex(64 * 1024);
        let (outbound, mut outbound_remote) = tokio::io::duplex(64 * 1024);

        let driver = {
            let session = Arc::clone(&session);
            let service = service;
            tokio::spawn(async move {
                service
                    .transfer(&session, Box::new(inbound), Box::new(outbound))
                    .await
            })
        };

        inbound_remote.write_all(b"ping-data").await.unwrap();
        let mut buf = [0u8; 9];
        outbound_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping-data");

        outbound_remote.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        inbound_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing one side ends the session cleanly.
        drop(inbound_remote);
        let result = driver.await.unwrap();
        assert!(result.is_ok());
        assert!(session.is_closed());
        assert_eq!(session.bytes_sent(), 9);
        assert_eq!(session.bytes_recv(), 4);
    }

    #[tokio::test]
    async fn the_duration_bound_terminates_idle_sessions() {
        let service = RelayService::new(
            Arc::new(BandwidthLimiter::new()),
            Some(Duration::from_millis(50)),
        );
        let session = service.open_session(node_id(1), node_id(2), "/dep2p/app/x/chat");

        let (inbound, _inbound_remote) = tokio::io::duplex(1024);
        let (outbound, _outbound_remote) = tokio::io::duplex(1024);
        let result = service
            .transfer(&session, Box::new(inbound), Box::new(outbound))
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::RelayDurationExceeded)
        ));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn closed_sessions_are_pruned() {
        let service = service();
        let session = service.open_session(node_id(1), node_id(2), "p");
        assert_eq!(service.active_sessions(), 1);
        session.mark_closed();
        assert_eq!(service.active_sessions(), 0);
        assert_eq!(service.prune_closed(), 1);
    }
}
