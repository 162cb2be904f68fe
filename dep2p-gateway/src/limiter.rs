// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Token-bucket bandwidth limiting for relay transfers.
//!
//! Tokens refill at the configured rate up to the burst capacity and always
//! stay within `[0, capacity]`. A blocked `acquire` polls every 10 ms, so a
//! cancelled caller stops waiting within one tick.

use crate::error::{GatewayError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default sustained rate: 100 MB/s.
pub const DEFAULT_RATE_BPS: u64 = 100 * 1024 * 1024;
/// Default burst capacity: 10 MB.
pub const DEFAULT_BURST_CAPACITY: u64 = 10 * 1024 * 1024;
/// Poll cadence while waiting for tokens.
const RETRY_TICK: Duration = Duration::from_millis(10);

/// Receipt for acquired bandwidth; hand it back via [`BandwidthLimiter::release`]
/// for bytes that were not actually sent.
#[derive(Clone, Copy, Debug)]
pub struct BandwidthToken {
    pub bytes: u64,
    pub timestamp: Instant,
}

struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Shared token bucket.
pub struct BandwidthLimiter {
    /// Bytes per second; updated atomically by `update_rate`.
    rate: AtomicU64,
    capacity: u64,
    state: Mutex<BucketState>,
}

impl BandwidthLimiter {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RATE_BPS, DEFAULT_BURST_CAPACITY)
    }

    pub fn with_limits(rate_bps: u64, capacity: u64) -> Self {
        Self {
            rate: AtomicU64::new(rate_bps),
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes `n` tokens, waiting for refills as needed. Requests beyond the
    /// burst capacity can never be satisfied and fail with `BandwidthLimit`.
    pub async fn acquire(&self, n: u64) -> Result<BandwidthToken> {
        if n > self.capacity {
            return Err(GatewayError::BandwidthLimit);
        }
        loop {
            if let Some(token) = self.try_acquire(n) {
                return Ok(token);
            }
            tokio::time::sleep(RETRY_TICK).await;
        }
    }

    /// Non-blocking acquire.
    pub fn try_acquire(&self, n: u64) -> Option<BandwidthToken> {
        let mut state = self.state.lock().expect("limiter lock");
        self.refill(&mut state);
        if state.tokens < n {
            return None;
        }
        state.tokens -= n;
        Some(BandwidthToken {
            bytes: n,
            timestamp: Instant::now(),
        })
    }

    /// Returns unused tokens to the bucket, clamped to capacity.
    pub fn release(&self, token: BandwidthToken) {
        let mut state = self.state.lock().expect("limiter lock");
        state.tokens = (state.tokens + token.bytes).min(self.capacity);
    }

    /// Changes the refill rate; takes effect on the next refill.
    pub fn update_rate(&self, rate_bps: u64) {
        self.rate.store(rate_bps, Ordering::SeqCst);
    }

    pub fn available(&self) -> u64 {
        let mut state = self.state.lock().expect("limiter lock");
        self.refill(&mut state);
        state.tokens
    }

    /// Adds `floor(rate * elapsed)` tokens, clamped to capacity. Partial
    /// token credit stays in the elapsed remainder: the refill clock only
    /// advances by the time actually converted.
    fn refill(&self, state: &mut BucketState) {
        let rate = self.rate.load(Ordering::SeqCst);
        if rate == 0 {
            return;
        }
        let elapsed = state.last_refill.elapsed();
        let earned = (elapsed.as_secs_f64() * rate as f64).floor() as u64;
        if earned == 0 {
            return;
        }
        state.tokens = (state.tokens + earned).min(self.capacity);
        let consumed = Duration::from_secs_f64(earned as f64 / rate as f64);
        state.last_refill += consumed;
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::new()
    }
}
