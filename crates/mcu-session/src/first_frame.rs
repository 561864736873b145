//! First-frame arbitration.
//!
//! The engine reports "first remote frame decoded" at least once per stream,
//! sometimes more. Within one arming window only the first composite frame is
//! forwarded to observers. Forwarding does not need a live observer: the last
//! forwarded composite frame stays in a `watch` slot for late subscribers.
//! Participant frames are always forwarded; deciding whether one is stale is
//! up to the render side.

use crate::errors::SessionError;
use crate::observability::metrics;
use common::types::StreamInfo;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

/// Buffered composite first-frame events per observer.
pub const COMPOSITE_EVENT_CAPACITY: usize = 64;

/// Buffered participant first-frame events per observer.
pub const PARTICIPANT_EVENT_CAPACITY: usize = 16;

/// Result of a first-frame notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstFrameOutcome {
    /// First composite frame of the window.
    CompositeForwarded(StreamInfo),
    /// A composite frame was already forwarded in this window.
    CompositeDuplicate,
    /// The arbiter is closed; the window stays open for a later duplicate.
    CompositeForwardFailed,
    /// Participant frame delivered (or dropped for lack of observers).
    Participant(StreamInfo),
}

#[derive(Debug, Default)]
struct ArmState {
    processed: bool,
    last_forwarded: Option<StreamInfo>,
    generation: u64,
    composite_observed: bool,
    closed: bool,
}

/// Deduplicates composite first frames per arming window.
pub struct FirstFrameArbiter {
    arm: Mutex<ArmState>,
    composite_tx: broadcast::Sender<StreamInfo>,
    latest_composite: watch::Sender<Option<StreamInfo>>,
    participant_tx: broadcast::Sender<StreamInfo>,
}

impl Default for FirstFrameArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl FirstFrameArbiter {
    pub fn new() -> Self {
        let (composite_tx, _) = broadcast::channel(COMPOSITE_EVENT_CAPACITY);
        let (participant_tx, _) = broadcast::channel(PARTICIPANT_EVENT_CAPACITY);
        let (latest_composite, _) = watch::channel(None);
        Self {
            arm: Mutex::new(ArmState::default()),
            composite_tx,
            latest_composite,
            participant_tx,
        }
    }

    pub fn subscribe_composite(&self) -> broadcast::Receiver<StreamInfo> {
        self.composite_tx.subscribe()
    }

    /// Latest forwarded composite frame, kept across arming windows.
    pub fn watch_composite(&self) -> watch::Receiver<Option<StreamInfo>> {
        self.latest_composite.subscribe()
    }

    pub fn subscribe_participant(&self) -> broadcast::Receiver<StreamInfo> {
        self.participant_tx.subscribe()
    }

    pub async fn on_first_frame(&self, info: StreamInfo, is_composite: bool) -> FirstFrameOutcome {
        if is_composite {
            self.on_composite(info).await
        } else {
            self.on_participant(info)
        }
    }

    async fn on_composite(&self, info: StreamInfo) -> FirstFrameOutcome {
        let mut arm = self.arm.lock().await;

        if arm.processed {
            debug!(
                target: "mcu.first_frame",
                stream = %info,
                generation = arm.generation,
                "Duplicate composite first frame discarded"
            );
            metrics::record_first_frame("composite", "duplicate");
            return FirstFrameOutcome::CompositeDuplicate;
        }

        arm.processed = true;
        match self.forward_composite(&arm, &info) {
            Ok(observers) => {
                arm.last_forwarded = Some(info.clone());
                arm.composite_observed = true;
                info!(
                    target: "mcu.first_frame",
                    generation = arm.generation,
                    observers = observers,
                    "Composite first frame forwarded"
                );
                metrics::record_first_frame("composite", "forwarded");
                FirstFrameOutcome::CompositeForwarded(info)
            }
            Err(e) => {
                arm.processed = false;
                warn!(
                    target: "mcu.first_frame",
                    error = %e,
                    generation = arm.generation,
                    "Composite first frame not delivered, rolled back"
                );
                metrics::record_first_frame("composite", "forward_failed");
                FirstFrameOutcome::CompositeForwardFailed
            }
        }
    }

    /// Returns the number of live observers reached, possibly zero.
    fn forward_composite(&self, arm: &ArmState, info: &StreamInfo) -> Result<usize, SessionError> {
        if arm.closed {
            return Err(SessionError::ForwardFailed);
        }
        self.latest_composite.send_replace(Some(info.clone()));
        Ok(self.composite_tx.send(info.clone()).unwrap_or(0))
    }

    fn on_participant(&self, info: StreamInfo) -> FirstFrameOutcome {
        if self.participant_tx.send(info.clone()).is_err() {
            debug!(
                target: "mcu.first_frame",
                stream_type = %info.stream_type,
                "Participant first frame had no observer"
            );
        }
        metrics::record_first_frame("participant", "forwarded");
        FirstFrameOutcome::Participant(info)
    }

    /// Open a new arming window. Returns its generation.
    pub async fn rearm(&self) -> u64 {
        let mut arm = self.arm.lock().await;
        arm.processed = false;
        arm.last_forwarded = None;
        arm.composite_observed = false;
        arm.generation = arm.generation.wrapping_add(1);
        debug!(
            target: "mcu.first_frame",
            generation = arm.generation,
            "First-frame window armed"
        );
        arm.generation
    }

    /// Stop forwarding composite frames. Called on session teardown.
    pub async fn close(&self) {
        self.arm.lock().await.closed = true;
    }

    /// True if window `generation` is still current and saw no composite frame.
    pub async fn needs_fallback(&self, generation: u64) -> bool {
        let arm = self.arm.lock().await;
        arm.generation == generation && !arm.composite_observed
    }

    /// Composite frame forwarded in the current window, if any.
    pub async fn last_forwarded(&self) -> Option<StreamInfo> {
        self.arm.lock().await.last_forwarded.clone()
    }
}
