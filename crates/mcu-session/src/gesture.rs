//! Single/double tap disambiguation.
//!
//! A tap is held pending for the double-tap timeout. A second tap inside the
//! window turns the pair into one double tap and the pending single tap is
//! never confirmed.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Tap event surfaced to observers. Coordinates are proportional to the view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TapEvent {
    SingleTap { x: f32, y: f32 },
    DoubleTap { x: f32, y: f32 },
}

/// What the caller should do with a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapDecision {
    DoubleTap,
    /// Confirm with [`TapClassifier::confirm_single`] once the timeout elapses.
    PendingSingle { generation: u64 },
}

#[derive(Debug)]
pub struct TapClassifier {
    timeout: Duration,
    last_tap: Option<Instant>,
    pending: Option<(f32, f32)>,
    generation: u64,
}

impl TapClassifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_tap: None,
            pending: None,
            generation: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn on_tap(&mut self, now: Instant, x: f32, y: f32) -> TapDecision {
        self.generation = self.generation.wrapping_add(1);

        let within_window = self
            .last_tap
            .is_some_and(|last| now.duration_since(last) <= self.timeout);
        if within_window && self.pending.is_some() {
            self.pending = None;
            self.last_tap = None;
            return TapDecision::DoubleTap;
        }

        self.last_tap = Some(now);
        self.pending = Some((x, y));
        TapDecision::PendingSingle {
            generation: self.generation,
        }
    }

    /// Take the pending tap if no later tap superseded `generation`.
    pub fn confirm_single(&mut self, generation: u64) -> Option<(f32, f32)> {
        if generation != self.generation {
            return None;
        }
        self.last_tap = None;
        self.pending.take()
    }
}
