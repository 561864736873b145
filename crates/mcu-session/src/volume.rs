//! Local microphone level smoothing for the speaking indicator.

use serde::Serialize;
use std::collections::VecDeque;

/// Raw levels are clamped to `0..=MAX_LEVEL`.
pub const MAX_LEVEL: i32 = 100;

/// Levels kept for the moving average.
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// Weight of the newest sample, in tenths (α = 0.3).
pub const SMOOTHING_TENTHS: i32 = 3;

/// Processed microphone level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MicLevel {
    pub smoothed: i32,
    pub average: i32,
}

#[derive(Debug)]
pub struct VolumeProcessor {
    history: VecDeque<i32>,
    history_size: usize,
    last: i32,
}

impl Default for VolumeProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl VolumeProcessor {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            history: VecDeque::with_capacity(history_size),
            history_size,
            last: 0,
        }
    }

    /// Clamp, record and smooth one raw level.
    pub fn process(&mut self, raw: i32) -> MicLevel {
        let level = raw.clamp(0, MAX_LEVEL);

        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(level);

        // Truncating integer division keeps the output within 0..=100
        self.last = (SMOOTHING_TENTHS * level + (10 - SMOOTHING_TENTHS) * self.last) / 10;

        MicLevel {
            smoothed: self.last,
            average: self.average(),
        }
    }

    /// Simple moving average of the history, 0 when empty.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn average(&self) -> i32 {
        if self.history.is_empty() {
            return 0;
        }
        self.history.iter().sum::<i32>() / self.history.len() as i32
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last = 0;
    }
}
