//! Layout rect normalization and hit testing.
//!
//! The engine reports the composite layout in pixels of a fixed reference
//! resolution. Rects are converted to fractions of that resolution so a tap on
//! a view of any size can be mapped back to a participant.

use common::types::{ParticipantId, StreamType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Composite stream aspect ratio, width part.
pub const ASPECT_WIDTH: u64 = 16;

/// Composite stream aspect ratio, height part.
pub const ASPECT_HEIGHT: u64 = 9;

/// A participant rect in reference-resolution pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub participant_id: ParticipantId,
    pub stream_type: StreamType,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A participant rect as fractions of the reference resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRect {
    pub participant_id: ParticipantId,
    pub stream_type: StreamType,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl LayoutRect {
    /// Inclusive on every edge.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// Divide each rect by the reference resolution.
///
/// Returns an empty list if either reference dimension is zero.
#[allow(clippy::cast_precision_loss)]
pub fn normalize(rects: &[PixelRect], reference_width: u32, reference_height: u32) -> Vec<LayoutRect> {
    if reference_width == 0 || reference_height == 0 {
        return Vec::new();
    }
    let w = reference_width as f32;
    let h = reference_height as f32;

    rects
        .iter()
        .map(|r| LayoutRect {
            participant_id: r.participant_id.clone(),
            stream_type: r.stream_type,
            x: r.x as f32 / w,
            y: r.y as f32 / h,
            width: r.width as f32 / w,
            height: r.height as f32 / h,
        })
        .collect()
}

/// First rect containing the proportional point, in layout order.
pub fn participant_at(rects: &[LayoutRect], x: f32, y: f32) -> Option<&LayoutRect> {
    rects.iter().find(|r| r.contains(x, y))
}

/// Largest 16:9 box fitting inside a container, as `(width, height)`.
pub fn fit_aspect_ratio(container_width: u32, container_height: u32) -> (u32, u32) {
    if container_width == 0 || container_height == 0 {
        return (0, 0);
    }
    let w = u64::from(container_width);
    let h = u64::from(container_height);

    if w * ASPECT_HEIGHT > h * ASPECT_WIDTH {
        let fitted = h * ASPECT_WIDTH / ASPECT_HEIGHT;
        (u32::try_from(fitted).unwrap_or(container_width), container_height)
    } else {
        let fitted = w * ASPECT_HEIGHT / ASPECT_WIDTH;
        (container_width, u32::try_from(fitted).unwrap_or(container_height))
    }
}

/// Participants that entered or left the layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutDiff {
    pub added: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
}

impl LayoutDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Latest normalized layout.
#[derive(Debug, Default)]
pub struct LayoutTracker {
    rects: Vec<LayoutRect>,
}

impl LayoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rects(&self) -> &[LayoutRect] {
        &self.rects
    }

    /// Replace the layout. Empty updates are ignored and return `None`.
    pub fn apply(&mut self, rects: Vec<LayoutRect>) -> Option<LayoutDiff> {
        if rects.is_empty() {
            return None;
        }
        let before: BTreeSet<&ParticipantId> = self.rects.iter().map(|r| &r.participant_id).collect();
        let after: BTreeSet<&ParticipantId> = rects.iter().map(|r| &r.participant_id).collect();

        let diff = LayoutDiff {
            added: after.difference(&before).map(|p| (*p).clone()).collect(),
            removed: before.difference(&after).map(|p| (*p).clone()).collect(),
        };
        self.rects = rects;
        Some(diff)
    }

    pub fn participant_at(&self, x: f32, y: f32) -> Option<&LayoutRect> {
        participant_at(&self.rects, x, y)
    }
}
