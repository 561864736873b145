//! Observability module for the MCU session core
//!
//! # Privacy by Default
//!
//! Async entry points use `#[instrument(skip_all)]` with explicit safe fields.
//! Participant accounts never appear in metric labels. Labels are bounded:
//! - `channel`: publish, pull
//! - `kind`: bounded by failure kinds (5 values)
//! - `state`: bounded by channel states (7 values)
//! - `target`: self_preview, composite, full_screen, attach
//! - `direction`: enter, exit
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `mcu_reconnect_scheduled_total` | Counter | `channel`, `kind` | Scheduled reconnection retries |
//! | `mcu_reconnect_delay_seconds` | Histogram | `channel` | Backoff delay chosen per retry |
//! | `mcu_channel_state_total` | Counter | `channel`, `state` | Channel state notifications |
//! | `mcu_first_frame_total` | Counter | `kind`, `outcome` | First-frame arbitration results |
//! | `mcu_render_apply_total` | Counter | `target`, `outcome` | Render-apply results |
//! | `mcu_fullscreen_transition_total` | Counter | `direction`, `outcome` | Full-screen transition results |
//!
//! No exporter is installed here; the embedding application owns the recorder.

pub mod metrics;

// Re-exports for convenience
pub use metrics::{
    record_channel_state, record_first_frame, record_fullscreen_transition, record_reconnect,
    record_render_apply,
};
