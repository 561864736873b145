//! Metrics definitions for the MCU session core
//!
//! All metrics follow Prometheus naming conventions:
//! - `mcu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Channel Metrics
// ============================================================================

/// Record a channel state notification.
///
/// Metric: `mcu_channel_state_total`
/// Labels: `channel` (publish, pull), `state`
///
/// Cardinality: 14 (2 channels x 7 states)
pub fn record_channel_state(channel: &'static str, state: &'static str) {
    counter!("mcu_channel_state_total", "channel" => channel, "state" => state).increment(1);
}

/// Record a scheduled reconnection retry and the delay chosen for it.
///
/// Metrics: `mcu_reconnect_scheduled_total`, `mcu_reconnect_delay_seconds`
/// Labels: `channel`, `kind` (counter); `channel` (histogram)
pub fn record_reconnect(channel: &'static str, kind: &'static str, delay: Duration) {
    counter!("mcu_reconnect_scheduled_total", "channel" => channel, "kind" => kind).increment(1);
    histogram!("mcu_reconnect_delay_seconds", "channel" => channel).record(delay.as_secs_f64());
}

// ============================================================================
// Render Metrics
// ============================================================================

/// Record a first-frame arbitration result.
///
/// Metric: `mcu_first_frame_total`
/// Labels: `kind` (composite, participant), `outcome` (forwarded, duplicate, forward_failed)
pub fn record_first_frame(kind: &'static str, outcome: &'static str) {
    counter!("mcu_first_frame_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a render-apply result.
///
/// Metric: `mcu_render_apply_total`
/// Labels: `target`, `outcome` (success, error, timeout, gave_up)
pub fn record_render_apply(target: &'static str, outcome: &'static str) {
    counter!("mcu_render_apply_total", "target" => target, "outcome" => outcome).increment(1);
}

/// Record a full-screen transition request result.
///
/// Metric: `mcu_fullscreen_transition_total`
/// Labels: `direction` (enter, exit), `outcome`
pub fn record_fullscreen_transition(direction: &'static str, outcome: &'static str) {
    counter!(
        "mcu_fullscreen_transition_total",
        "direction" => direction,
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These execute the recording functions without an installed recorder;
    // the metrics facade falls back to a no-op recorder.

    #[test]
    fn test_record_channel_state() {
        record_channel_state("publish", "connected");
        record_channel_state("pull", "failed");
    }

    #[test]
    fn test_record_reconnect() {
        record_reconnect("pull", "create_failed", Duration::from_millis(1000));
        record_reconnect("publish", "publish_dropped", Duration::from_secs(30));
    }

    #[test]
    fn test_record_render_metrics() {
        record_first_frame("composite", "forwarded");
        record_render_apply("composite", "timeout");
        record_fullscreen_transition("enter", "gate_held");
    }

    #[test]
    fn test_metric_names_and_values() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_reconnect("pull", "channel_failed", Duration::from_millis(600));
            record_reconnect("pull", "channel_failed", Duration::from_millis(1200));
            record_fullscreen_transition("exit", "applied");
        });

        let entries = snapshotter.snapshot().into_vec();
        let counter_value = |name: &str| {
            entries.iter().find_map(|(key, _, _, value)| {
                if key.key().name() != name {
                    return None;
                }
                match value {
                    DebugValue::Counter(n) => Some(*n),
                    _ => None,
                }
            })
        };

        assert_eq!(counter_value("mcu_reconnect_scheduled_total"), Some(2));
        assert_eq!(counter_value("mcu_fullscreen_transition_total"), Some(1));
        assert!(entries
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "mcu_reconnect_delay_seconds"));
    }
}
