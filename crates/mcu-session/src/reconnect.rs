//! Reconnection backoff scheduler.
//!
//! Keeps one [`ReconnectRecord`] per channel id and at most one pending retry
//! per channel id. A retry has two phases:
//!
//! 1. The backoff delay. Cancelled by `reset`, by a superseding `schedule`
//!    for the same channel, or by session teardown.
//! 2. The retry action (tear down, settle, recreate). Only session teardown
//!    cancels it, since the teardown it performs produces the very CLOSED
//!    notification that resets the record.
//!
//! Retries never give up: past the tenth attempt every retry waits the
//! ceiling delay.

use crate::observability::metrics;
use crate::state::{ChannelRole, FailureKind};
use chrono::{DateTime, Utc};
use common::engine::NetworkMonitor;
use common::types::{ChannelId, NetworkStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upper bound for any retry delay.
pub const BACKOFF_CEILING: Duration = Duration::from_millis(30_000);

/// Attempt count from which the ceiling applies unconditionally.
pub const BACKOFF_CEILING_ATTEMPTS: u32 = 10;

/// Retry delay while the network is unavailable.
pub const OFFLINE_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Base delay after a failed pull channel creation.
pub const CREATE_FAILURE_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Base delay on Wi-Fi.
pub const WIFI_BASE_DELAY: Duration = Duration::from_millis(300);

/// Base delay on cellular or unknown networks.
pub const CELLULAR_BASE_DELAY: Duration = Duration::from_millis(800);

/// Base delay for a failure under the given network conditions.
pub fn base_delay(kind: FailureKind, network: NetworkStatus) -> Duration {
    match (network, kind) {
        (NetworkStatus::Unavailable, _) => OFFLINE_RETRY_DELAY,
        (_, FailureKind::CreateFailed) => CREATE_FAILURE_BASE_DELAY,
        (NetworkStatus::Wifi, _) => WIFI_BASE_DELAY,
        (NetworkStatus::Cellular, _) => CELLULAR_BASE_DELAY,
    }
}

/// `min(base * 2^attempts, ceiling)`, or the ceiling from the tenth attempt on.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    if attempts >= BACKOFF_CEILING_ATTEMPTS {
        return BACKOFF_CEILING;
    }
    base.saturating_mul(1u32 << attempts).min(BACKOFF_CEILING)
}

/// Delay for the next retry of a channel that already failed `attempts` times.
///
/// An unavailable network retries at a flat [`OFFLINE_RETRY_DELAY`] until the
/// ceiling attempt count is reached.
pub fn retry_delay(kind: FailureKind, network: NetworkStatus, attempts: u32) -> Duration {
    if attempts >= BACKOFF_CEILING_ATTEMPTS {
        return BACKOFF_CEILING;
    }
    match network {
        NetworkStatus::Unavailable => OFFLINE_RETRY_DELAY,
        NetworkStatus::Wifi | NetworkStatus::Cellular => {
            backoff_delay(base_delay(kind, network), attempts)
        }
    }
}

/// Retry bookkeeping for one channel id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectRecord {
    pub channel_id: ChannelId,
    /// Retries scheduled since the last success or close.
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}

struct PendingRetry {
    token: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct SchedulerState {
    records: HashMap<ChannelId, ReconnectRecord>,
    pending: HashMap<ChannelId, PendingRetry>,
    next_generation: u64,
}

/// Per-channel retry scheduler.
pub struct ReconnectScheduler {
    network: Arc<dyn NetworkMonitor>,
    state: Arc<Mutex<SchedulerState>>,
    /// Session-wide token; every delay and action runs under a child of it.
    cancel_token: CancellationToken,
}

impl ReconnectScheduler {
    pub fn new(network: Arc<dyn NetworkMonitor>, cancel_token: CancellationToken) -> Self {
        Self {
            network,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            cancel_token,
        }
    }

    /// Schedule `action` for `channel_id` after the backoff delay.
    ///
    /// Supersedes any pending retry for the same channel. Returns the delay.
    pub fn schedule<F>(
        &self,
        channel_id: &ChannelId,
        role: ChannelRole,
        kind: FailureKind,
        action: F,
    ) -> Duration
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let network = self.network.status();
        let pending = self.cancel_token.child_token();

        let (delay, attempts, generation) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(previous) = state.pending.remove(channel_id) {
                previous.token.cancel();
            }

            let record = state
                .records
                .entry(channel_id.clone())
                .or_insert_with(|| ReconnectRecord {
                    channel_id: channel_id.clone(),
                    attempts: 0,
                    last_attempt_at: Utc::now(),
                });
            let delay = retry_delay(kind, network, record.attempts);
            record.attempts = record.attempts.saturating_add(1);
            record.last_attempt_at = Utc::now();
            let attempts = record.attempts;

            state.next_generation = state.next_generation.wrapping_add(1);
            let generation = state.next_generation;
            state.pending.insert(
                channel_id.clone(),
                PendingRetry {
                    token: pending.clone(),
                    generation,
                },
            );
            (delay, attempts, generation)
        };

        metrics::record_reconnect(role.as_str(), kind.as_str(), delay);
        info!(
            target: "mcu.reconnect",
            channel_id = %channel_id,
            channel = role.as_str(),
            kind = kind.as_str(),
            network = network.as_str(),
            attempts = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );

        let state = Arc::clone(&self.state);
        let session_token = self.cancel_token.clone();
        let channel_id = channel_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = pending.cancelled() => {
                    debug!(
                        target: "mcu.reconnect",
                        channel_id = %channel_id,
                        "Pending reconnect cancelled"
                    );
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state
                    .pending
                    .get(&channel_id)
                    .is_some_and(|p| p.generation == generation)
                {
                    state.pending.remove(&channel_id);
                }
            }

            debug!(
                target: "mcu.reconnect",
                channel_id = %channel_id,
                attempts = attempts,
                "Reconnect firing"
            );

            tokio::select! {
                () = session_token.cancelled() => {}
                () = action => {}
            }
        });

        delay
    }

    /// Forget the record for `channel_id` and cancel its pending retry.
    ///
    /// Returns true if there was anything to reset.
    pub fn reset(&self, channel_id: &ChannelId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = state.pending.remove(channel_id);
        if let Some(pending) = &pending {
            pending.token.cancel();
        }
        let record = state.records.remove(channel_id);
        if pending.is_some() || record.is_some() {
            debug!(
                target: "mcu.reconnect",
                channel_id = %channel_id,
                "Reconnect state reset"
            );
            true
        } else {
            false
        }
    }

    /// Cancel every pending retry and clear every record.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in state.pending.drain() {
            pending.token.cancel();
        }
        state.records.clear();
    }

    /// Retries scheduled for `channel_id` since its last success or close.
    pub fn attempts(&self, channel_id: &ChannelId) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(channel_id)
            .map_or(0, |r| r.attempts)
    }

    pub fn record(&self, channel_id: &ChannelId) -> Option<ReconnectRecord> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(channel_id)
            .cloned()
    }

    /// Whether a retry for `channel_id` is still waiting out its delay.
    pub fn has_pending(&self, channel_id: &ChannelId) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .contains_key(channel_id)
    }
}
