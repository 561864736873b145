//! Common error types for MCU session components.

use thiserror::Error;

/// Errors reported by the media engine capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine answered with a non-zero result code
    #[error("Engine rejected request with code {code}")]
    Rejected { code: i32 },

    /// The engine is not initialized or has been released
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// Any other engine-side failure
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Engine result code, if the engine produced one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rejected { code } => Some(*code),
            Self::Unavailable(_) | Self::Internal(_) => None,
        }
    }
}

/// Result type alias using `EngineError`
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            EngineError::Rejected { code: -3 }.to_string(),
            "Engine rejected request with code -3"
        );
        assert_eq!(
            EngineError::Unavailable("released".to_string()).to_string(),
            "Engine unavailable: released"
        );
        assert_eq!(
            EngineError::Internal("boom".to_string()).to_string(),
            "Internal engine error: boom"
        );
    }

    #[test]
    fn test_code() {
        assert_eq!(EngineError::Rejected { code: 7 }.code(), Some(7));
        assert_eq!(EngineError::Internal("x".to_string()).code(), None);
    }
}
