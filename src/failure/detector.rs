use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::net::PeerClient;
use crate::ring::NodeRef;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Pause between probe rounds in the failure-check loop.
    pub probe_interval: Duration,
    /// Consecutive missed probes before a peer is declared failed; half of
    /// this (rounded down) marks it suspected.
    pub failure_threshold: u32,
    /// Status entries untouched for this long are dropped by `cleanup`.
    pub max_entry_age: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            probe_interval: Duration::from_secs(2),
            failure_threshold: 3,
            max_entry_age: Duration::from_secs(30 * 60),
        }
    }
}

/// Health record for one peer endpoint.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub last_seen: Instant,
    pub consecutive_failures: u32,
    pub suspected: bool,
    pub failed: bool,
}

impl PeerStatus {
    fn fresh() -> Self {
        PeerStatus {
            last_seen: Instant::now(),
            consecutive_failures: 0,
            suspected: false,
            failed: false,
        }
    }
}

/// Ping-driven health map over peer endpoints.
pub struct FailureDetector {
    config: DetectorConfig,
    client: PeerClient,
    statuses: DashMap<String, PeerStatus>,
}

impl FailureDetector {
    pub fn new(config: DetectorConfig, client: PeerClient) -> Self {
        FailureDetector {
            config,
            client,
            statuses: DashMap::new(),
        }
    }

    /// Sends one liveness probe to `peer` and folds the result into its
    /// status. Returns whether the peer answered.
    pub async fn probe(&self, peer: &NodeRef) -> bool {
        let endpoint = peer.endpoint();
        match self.client.ping(&endpoint).await {
            Ok(()) => {
                self.mark_responsive(&endpoint);
                true
            }
            Err(e) => {
                tracing::debug!("probe of {} failed: {}", peer, e);
                self.record_failure(&endpoint);
                false
            }
        }
    }

    /// Direct override after any successful contact: the peer is healthy.
    pub fn mark_responsive(&self, endpoint: &str) {
        self.statuses
            .insert(endpoint.to_string(), PeerStatus::fresh());
    }

    /// Direct override after a failed contact: the peer is failed outright,
    /// without waiting for the probe loop to reach the threshold.
    pub fn mark_failed(&self, endpoint: &str) {
        let mut status = self
            .statuses
            .entry(endpoint.to_string())
            .or_insert_with(PeerStatus::fresh);
        status.consecutive_failures = self.config.failure_threshold;
        status.suspected = true;
        status.failed = true;
    }

    fn record_failure(&self, endpoint: &str) {
        let mut status = self
            .statuses
            .entry(endpoint.to_string())
            .or_insert_with(PeerStatus::fresh);
        status.consecutive_failures += 1;
        if status.consecutive_failures >= self.config.failure_threshold {
            if !status.failed {
                tracing::info!("peer {} marked failed", endpoint);
            }
            status.failed = true;
            status.suspected = true;
        } else if status.consecutive_failures >= self.config.failure_threshold / 2 {
            status.suspected = true;
        }
    }

    pub fn is_failed(&self, endpoint: &str) -> bool {
        self.statuses
            .get(endpoint)
            .map(|status| status.failed)
            .unwrap_or(false)
    }

    pub fn is_suspected(&self, endpoint: &str) -> bool {
        self.statuses
            .get(endpoint)
            .map(|status| status.suspected)
            .unwrap_or(false)
    }

    /// Snapshot of every endpoint currently considered failed.
    pub fn failed_peers(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|entry| entry.value().failed)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn status(&self, endpoint: &str) -> Option<PeerStatus> {
        self.statuses.get(endpoint).map(|entry| entry.value().clone())
    }

    /// Drops entries whose `last_seen` is older than the configured age.
    pub fn cleanup(&self) {
        let max_age = self.config.max_entry_age;
        self.statuses
            .retain(|_, status| status.last_seen.elapsed() <= max_age);
    }

    pub fn tracked_peers(&self) -> usize {
        self.statuses.len()
    }
}
