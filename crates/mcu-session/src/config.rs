//! MCU session configuration.
//!
//! Configuration is loaded from environment variables. The local account is
//! redacted in Debug output.

use common::config::{ObservabilityConfig, DEFAULT_LOG_FILTER};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionIdentity;

/// Default settle period between tearing a channel down and recreating it.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Default grace window before the composite render is applied without a first frame.
pub const DEFAULT_FIRST_FRAME_GRACE_MS: u64 = 1500;

/// Default hard timeout for a single render-apply.
pub const DEFAULT_RENDER_APPLY_TIMEOUT_MS: u64 = 5000;

/// Default delay before the single render-apply retry.
pub const DEFAULT_RENDER_RETRY_DELAY_MS: u64 = 2000;

/// Default debounce window between full-screen transitions.
pub const DEFAULT_FULLSCREEN_DEBOUNCE_MS: u64 = 800;

/// Default window in which a second tap counts as a double tap.
pub const DEFAULT_DOUBLE_TAP_TIMEOUT_MS: u64 = 300;

/// Default layout reference frame width in pixels.
pub const DEFAULT_REFERENCE_WIDTH: u32 = 1920;

/// Default layout reference frame height in pixels.
pub const DEFAULT_REFERENCE_HEIGHT: u32 = 1080;

/// Default session ID prefix.
pub const DEFAULT_SESSION_ID_PREFIX: &str = "mcu";

/// Timer settings shared by the session components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub settle_delay: Duration,
    pub first_frame_grace: Duration,
    pub render_apply_timeout: Duration,
    pub render_retry_delay: Duration,
    pub fullscreen_debounce: Duration,
    pub double_tap_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            first_frame_grace: Duration::from_millis(DEFAULT_FIRST_FRAME_GRACE_MS),
            render_apply_timeout: Duration::from_millis(DEFAULT_RENDER_APPLY_TIMEOUT_MS),
            render_retry_delay: Duration::from_millis(DEFAULT_RENDER_RETRY_DELAY_MS),
            fullscreen_debounce: Duration::from_millis(DEFAULT_FULLSCREEN_DEBOUNCE_MS),
            double_tap_timeout: Duration::from_millis(DEFAULT_DOUBLE_TAP_TIMEOUT_MS),
        }
    }
}

/// MCU session configuration.
///
/// Loaded from environment variables with sensible defaults.
/// The account is redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Room to join.
    pub room_id: String,

    /// Local account used for publishing.
    pub account: String,

    /// Unique identifier for this session, attached to log events.
    pub session_id: String,

    /// Timer settings.
    pub timings: Timings,

    /// Width of the pixel frame layout rects are reported in.
    pub reference_width: u32,

    /// Height of the pixel frame layout rects are reported in.
    pub reference_height: u32,

    /// Logging settings for the replay binary.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts the account.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("room_id", &self.room_id)
            .field("account", &"[REDACTED]")
            .field("session_id", &self.session_id)
            .field("timings", &self.timings)
            .field("reference_width", &self.reference_width)
            .field("reference_height", &self.reference_height)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Configuration with default timings for the given room and account.
    #[must_use]
    pub fn new(room_id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            account: account.into(),
            session_id: generate_session_id(),
            timings: Timings::default(),
            reference_width: DEFAULT_REFERENCE_WIDTH,
            reference_height: DEFAULT_REFERENCE_HEIGHT,
            observability: ObservabilityConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let room_id = vars
            .get("MCU_ROOM_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("MCU_ROOM_ID".to_string()))?
            .clone();

        let account = vars
            .get("MCU_ACCOUNT")
            .ok_or_else(|| ConfigError::MissingEnvVar("MCU_ACCOUNT".to_string()))?
            .clone();

        let timings = Timings {
            settle_delay: millis(vars, "MCU_SETTLE_DELAY_MS", DEFAULT_SETTLE_DELAY_MS),
            first_frame_grace: millis(vars, "MCU_FIRST_FRAME_GRACE_MS", DEFAULT_FIRST_FRAME_GRACE_MS),
            render_apply_timeout: millis(
                vars,
                "MCU_RENDER_APPLY_TIMEOUT_MS",
                DEFAULT_RENDER_APPLY_TIMEOUT_MS,
            ),
            render_retry_delay: millis(
                vars,
                "MCU_RENDER_RETRY_DELAY_MS",
                DEFAULT_RENDER_RETRY_DELAY_MS,
            ),
            fullscreen_debounce: millis(
                vars,
                "MCU_FULLSCREEN_DEBOUNCE_MS",
                DEFAULT_FULLSCREEN_DEBOUNCE_MS,
            ),
            double_tap_timeout: millis(
                vars,
                "MCU_DOUBLE_TAP_TIMEOUT_MS",
                DEFAULT_DOUBLE_TAP_TIMEOUT_MS,
            ),
        };

        // Parse the layout reference frame
        let reference_width = vars
            .get("MCU_REFERENCE_WIDTH")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFERENCE_WIDTH);

        let reference_height = vars
            .get("MCU_REFERENCE_HEIGHT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFERENCE_HEIGHT);

        if reference_width == 0 || reference_height == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "reference frame must be non-zero, got {reference_width}x{reference_height}"
            )));
        }

        let session_id = vars
            .get("MCU_SESSION_ID")
            .cloned()
            .unwrap_or_else(generate_session_id);

        let observability = ObservabilityConfig {
            log_filter: vars
                .get("MCU_LOG_FILTER")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            json_logs: vars
                .get("MCU_LOG_JSON")
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        };

        Ok(Config {
            room_id,
            account,
            session_id,
            timings,
            reference_width,
            reference_height,
            observability,
        })
    }

    /// Identity the session joins with.
    #[must_use]
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(self.room_id.as_str(), self.account.as_str())
    }
}

fn millis(vars: &HashMap<String, String>, key: &str, default: u64) -> Duration {
    Duration::from_millis(
        vars.get(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

fn generate_session_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_SESSION_ID_PREFIX}-{hostname}-{short_suffix}")
}
