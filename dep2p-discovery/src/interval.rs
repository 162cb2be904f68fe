// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Adaptive discovery polling.
//!
//! The interval widens as the peer count approaches the target and collapses
//! to the minimum while emergency recovery is active. Recovery trips on a
//! halved peer count, a run of failed discovery rounds, or near-isolation.

use crate::config::DiscoveryConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Entries remembered for the drop detector.
const HISTORY_LEN: usize = 10;
/// Discovery round failures before recovery trips.
const FAILURE_THRESHOLD: u32 = 3;
/// Peer count under which the node counts as isolated.
const ISOLATION_THRESHOLD: usize = 3;
/// Recovery gives up waiting for growth after this long.
const RECOVERY_MAX_DURATION: Duration = Duration::from_secs(10 * 60);
/// Recovery exits once this many peers are connected.
const RECOVERY_EXIT_COUNT: usize = 10;

#[derive(Clone, Copy, Debug)]
struct RecoveryState {
    started: Instant,
    peers_at_trigger: usize,
}

/// Computes the next discovery interval from the current peer count.
#[derive(Debug)]
pub struct DynamicInterval {
    base: Duration,
    min: Duration,
    max: Duration,
    target: usize,
    history: VecDeque<usize>,
    consecutive_failures: u32,
    recovery: Option<RecoveryState>,
}

impl DynamicInterval {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            base: config.base_interval,
            min: config.min_interval,
            max: config.max_interval,
            target: config.target_peer_count,
            history: VecDeque::with_capacity(HISTORY_LEN),
            consecutive_failures: 0,
            recovery: None,
        }
    }

    /// Picks the interval for the next round and records `current` into the
    /// bounded history.
    pub fn calculate(&mut self, current: usize) -> Duration {
        if let Some(state) = self.recovery {
            if self.recovery_should_exit(&state, current) {
                info!(
                    "Exiting emergency recovery: {} peers (was {} at trigger)",
                    current, state.peers_at_trigger
                );
                self.recovery = None;
                self.consecutive_failures = 0;
            }
        } else if self.should_trigger_recovery(current) {
            warn!("Entering emergency recovery with {current} peers");
            self.recovery = Some(RecoveryState {
                started: Instant::now(),
                peers_at_trigger: current,
            });
        }

        self.push_history(current);

        if self.recovery.is_some() {
            return self.min;
        }

        let ratio = current as f64 / self.target as f64;
        let interval = if ratio < 0.3 {
            self.min
        } else if ratio < 0.5 {
            self.base / 2
        } else if ratio <= 0.9 {
            self.base
        } else {
            self.base * 2
        };
        interval.clamp(self.min, self.max)
    }

    /// Records a failed discovery round. Three in a row trip recovery.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Records a successful discovery round.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    fn push_history(&mut self, current: usize) {
        if self.history.len() == HISTORY_LEN {
            let _ = self.history.pop_front();
        }
        self.history.push_back(current);
    }

    fn should_trigger_recovery(&self, current: usize) -> bool {
        if current < ISOLATION_THRESHOLD {
            return true;
        }
        if self.consecutive_failures >= FAILURE_THRESHOLD {
            return true;
        }
        // Trip when the peer count halved versus the oldest remembered count.
        match self.history.front() {
            Some(&head) => head >= current.saturating_mul(2) && head > 0,
            None => false,
        }
    }

    fn recovery_should_exit(&self, state: &RecoveryState, current: usize) -> bool {
        current >= state.peers_at_trigger.saturating_mul(2) && current >= ISOLATION_THRESHOLD
            || current >= RECOVERY_EXIT_COUNT
            || state.started.elapsed() >= RECOVERY_MAX_DURATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval() -> DynamicInterval {
        DynamicInterval::new(&DiscoveryConfig::default())
    }

    #[test]
    fn bands_follow_the_peer_ratio() {
        let mut di = interval();
        assert_eq!(di.calculate(0), Duration::from_secs(5));
        assert_eq!(di.calculate(10), Duration::from_secs(5));
        assert_eq!(di.calculate(20), Duration::from_secs(15));
        assert_eq!(di.calculate(30), Duration::from_secs(30));
        assert_eq!(di.calculate(46), Duration::from_secs(60));
    }

    #[test]
    fn isolation_triggers_recovery_and_growth_exits_it() {
        let mut di = interval();
        assert_eq!(di.calculate(2), Duration::from_secs(5));
        assert!(di.is_recovering());
        // Ten connected peers end the emergency.
        assert_eq!(di.calculate(20), Duration::from_secs(15));
        assert!(!di.is_recovering());
    }

    #[test]
    fn halved_peer_count_triggers_recovery() {
        let mut di = interval();
        let _ = di.calculate(40);
        let _ = di.calculate(40);
        let interval = di.calculate(20);
        assert!(di.is_recovering());
        assert_eq!(interval, Duration::from_secs(5));
    }

    #[test]
    fn repeated_failures_trigger_recovery() {
        let mut di = interval();
        let _ = di.calculate(30);
        di.record_failure();
        di.record_failure();
        assert!(!di.is_recovering());
        di.record_failure();
        let _ = di.calculate(30);
        assert!(di.is_recovering());
    }

    #[test]
    fn history_is_bounded() {
        let mut di = interval();
        for _ in 0..50 {
            let _ = di.calculate(30);
        }
        assert!(di.history.len() <= HISTORY_LEN);
    }
}
