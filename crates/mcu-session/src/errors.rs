//! MCU session error types.
//!
//! Only setup failures leave the session. Channel and render failures are
//! contained: they show up as state transitions, log events and metrics.

use common::error::EngineError;
use thiserror::Error;

/// MCU session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session could not be started (missing or empty identity).
    #[error("Session setup failed: {0}")]
    Setup(String),

    /// An engine command failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// A render-apply did not complete within its timeout.
    #[error("Render apply timed out")]
    RenderTimeout,

    /// A full-screen render needs a pull channel and none is open.
    #[error("No pull channel available")]
    MissingPullChannel,

    /// A first-frame event had no live observer.
    #[error("First-frame forward failed: no observer")]
    ForwardFailed,

    /// The session reactor has stopped.
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Returns true for errors that end the session before it starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Setup(_))
    }
}
