// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Active latency probing.
//!
//! A probe opens a ping stream, writes 32 random bytes and expects the exact
//! payload echoed back; the round trip lands in a per-peer rolling window
//! from which the statistics are computed.

use crate::error::{Result, RoutingError};
use crate::types::LatencyStats;
use dep2p_protocol::endpoint::{Endpoint, RawStream};
use dep2p_protocol::version::PING_PROTOCOL;
use dep2p_protocol::NodeId;
use rand::RngCore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Semaphore};

/// Ping payload size.
pub const PING_PAYLOAD_LEN: usize = 32;
/// Samples kept per peer.
pub const DEFAULT_LATENCY_WINDOW: usize = 10;
/// Cadence of the probe loop.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Concurrent probes per loop round.
const MAX_CONCURRENT_PROBES: usize = 10;

/// Measures and aggregates peer latencies.
pub struct LatencyProber {
    endpoint: Arc<dyn Endpoint>,
    window_size: usize,
    probe_interval: Duration,
    windows: Mutex<HashMap<NodeId, VecDeque<Duration>>>,
    targets: Mutex<HashSet<NodeId>>,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl LatencyProber {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Arc<Self> {
        Self::with_limits(endpoint, DEFAULT_LATENCY_WINDOW, DEFAULT_PROBE_INTERVAL)
    }

    pub fn with_limits(
        endpoint: Arc<dyn Endpoint>,
        window_size: usize,
        probe_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            window_size: window_size.max(1),
            probe_interval,
            windows: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        })
    }

    /// Adds a peer to the periodic probe set.
    pub fn add_peer(&self, node: NodeId) {
        let _ = self.targets.lock().expect("prober targets lock").insert(node);
    }

    /// Removes a peer and forgets its window.
    pub fn remove_peer(&self, node: &NodeId) {
        let _ = self.targets.lock().expect("prober targets lock").remove(node);
        let _ = self.windows.lock().expect("prober windows lock").remove(node);
    }

    /// Probes one peer now and records the measurement.
    pub async fn probe(&self, node: &NodeId) -> Result<Duration> {
        let mut stream = self
            .endpoint
            .open_stream(node, PING_PROTOCOL)
            .await
            .map_err(|err| RoutingError::ProbeFailed {
                node: node.clone(),
                reason: err.to_string(),
            })?;

        let mut payload = [0u8; PING_PAYLOAD_LEN];
        rand::thread_rng().fill_bytes(&mut payload);

        let started = Instant::now();
        let elapsed = async {
            stream.write_all(&payload).await?;
            stream.flush().await?;
            let mut echoed = [0u8; PING_PAYLOAD_LEN];
            stream.read_exact(&mut echoed).await?;
            if echoed != payload {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "ping payload mismatch",
                ));
            }
            Ok::<_, std::io::Error>(started.elapsed())
        }
        .await
        .map_err(|err| RoutingError::ProbeFailed {
            node: node.clone(),
            reason: err.to_string(),
        })?;

        self.record(node, elapsed);
        Ok(elapsed)
    }

    /// Serves the echo side of the ping protocol on an inbound stream.
    pub async fn serve_ping<S: RawStream>(stream: &mut S) -> std::io::Result<()> {
        let mut payload = [0u8; PING_PAYLOAD_LEN];
        stream.read_exact(&mut payload).await?;
        stream.write_all(&payload).await?;
        stream.flush().await
    }

    /// The cached mean latency for a peer, if any samples exist.
    pub fn mean_latency(&self, node: &NodeId) -> Option<Duration> {
        let windows = self.windows.lock().expect("prober windows lock");
        let window = windows.get(node)?;
        if window.is_empty() {
            return None;
        }
        let sum: Duration = window.iter().sum();
        Some(sum / window.len() as u32)
    }

    /// Statistics over the rolling window: the window is copied then sorted,
    /// the live buffer keeps its arrival order.
    pub fn statistics(&self, node: &NodeId) -> Option<LatencyStats> {
        let samples: Vec<Duration> = {
            let windows = self.windows.lock().expect("prober windows lock");
            windows.get(node)?.iter().copied().collect()
        };
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.clone();
        sorted.sort();
        let sum: Duration = samples.iter().sum();
        Some(LatencyStats {
            mean: sum / samples.len() as u32,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        })
    }

    /// Starts the periodic probe loop. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().expect("prober shutdown lock") = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.probe_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => this.probe_round().await,
                    _ = rx.changed() => return,
                }
            }
        });
        Ok(())
    }

    /// Stops the probe loop. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.lock().expect("prober shutdown lock").take() {
            let _ = tx.send(true);
        }
        Ok(())
    }

    /// Probes every registered peer, at most [`MAX_CONCURRENT_PROBES`] at a
    /// time.
    async fn probe_round(self: &Arc<Self>) {
        let targets: Vec<NodeId> = {
            let targets = self.targets.lock().expect("prober targets lock");
            targets.iter().cloned().collect()
        };
        if targets.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
        let mut tasks = Vec::with_capacity(targets.len());
        for node in targets {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Err(err) = this.probe(&node).await {
                    debug!("Probe failed: {err}");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    fn record(&self, node: &NodeId, sample: Duration) {
        let mut windows = self.windows.lock().expect("prober windows lock");
        let window = windows.entry(node.clone()).or_default();
        if window.len() == self.window_size {
            let _ = window.pop_front();
        }
        window.push_back(sample);
    }
}

/// Nearest-rank percentile over a sorted sample set.
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    let index = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dep2p_protocol::endpoint::BoxStream;
    use dep2p_protocol::Multiaddr;
    use std::io;

    struct EchoEndpoint {
        local: NodeId,
    }

    #[async_trait]
    impl Endpoint for EchoEndpoint {
        fn local_node(&self) -> NodeId {
            self.local.clone()
        }

        fn local_addrs(&self) -> Vec<Multiaddr> {
            Vec::new()
        }

        async fn open_stream(&self, _node: &NodeId, protocol: &str) -> io::Result<BoxStream> {
            assert_eq!(protocol, PING_PROTOCOL);
            let (client, mut server) = tokio::io::duplex(1024);
            let _handle = tokio::spawn(async move {
                let _ = LatencyProber::serve_ping(&mut server).await;
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

    fn node_id(n: u8) -> NodeId {
        NodeId::from_bytes(&[n; 32]).unwrap()
    }

    fn prober() -> Arc<LatencyProber> {
        LatencyProber::with_limits(
            Arc::new(EchoEndpoint { local: node_id(0) }),
            DEFAULT_LATENCY_WINDOW,
            DEFAULT_PROBE_INTERVAL,
        )
    }

    #[tokio::test]
    async fn probe_measures_an_echo_round_trip() {
        let prober = prober();
        let elapsed = prober.probe(&node_id(1)).await.unwrap();
        assert!(elapsed < Duration::from_secs(1));
        assert!(prober.mean_latency(&node_id(1)).is_some());
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let prober = prober();
        for _ in 0..25 {
            let _ = prober.probe(&node_id(1)).await.unwrap();
        }
        let windows = prober.windows.lock().unwrap();
        assert_eq!(windows.get(&node_id(1)).unwrap().len(), DEFAULT_LATENCY_WINDOW);
    }

    #[tokio::test]
    async fn statistics_come_from_a_sorted_copy() {
        let prober = prober();
        for ms in [30u64, 10, 20] {
            prober.record(&node_id(1), Duration::from_millis(ms));
        }
        let stats = prober.statistics(&node_id(1)).unwrap();
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.p50, Duration::from_millis(20));
        assert_eq!(stats.mean, Duration::from_millis(20));
        // Arrival order survives in the live window.
        let windows = prober.windows.lock().unwrap();
        let window = windows.get(&node_id(1)).unwrap();
        assert_eq!(window[0], Duration::from_millis(30));
    }

    #[tokio::test]
    async fn removed_peers_lose_their_window() {
        let prober = prober();
        let _ = prober.probe(&node_id(1)).await.unwrap();
        prober.remove_peer(&node_id(1));
        assert!(prober.mean_latency(&node_id(1)).is_none());
        assert!(prober.statistics(&node_id(1)).is_none());
    }
}
