use thiserror::Error;

use super::session::SessionState;
use crate::detect::DetectError;
use crate::input::InputError;
use crate::utils::Halted;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow or settings are malformed. Never swallowed by `continueOnError`.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An image or pixel was required but absent.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    /// Capture, injection or template loading failed at the platform boundary.
    #[error("Device error: {0}")]
    Device(String),

    #[error("A workflow is already running")]
    AlreadyRunning,

    #[error("Cannot {op} while {state}")]
    InvalidTransition {
        op: &'static str,
        state: SessionState,
    },

    #[error("Execution halted by emergency stop")]
    Halted,
}

impl EngineError {
    /// Whether `continueOnError` may discard this error. Device failures always propagate.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::NotFound(_) | EngineError::Timeout { .. })
    }
}

impl From<InputError> for EngineError {
    fn from(e: InputError) -> Self {
        match e {
            InputError::Halted => EngineError::Halted,
            InputError::UnknownKey(_) => EngineError::Validation(e.to_string()),
            InputError::Device(msg) => EngineError::Device(msg),
        }
    }
}

impl From<DetectError> for EngineError {
    fn from(e: DetectError) -> Self {
        match e {
            DetectError::Halted => EngineError::Halted,
            other => EngineError::Device(other.to_string()),
        }
    }
}

impl From<Halted> for EngineError {
    fn from(_: Halted) -> Self {
        EngineError::Halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_negative_results_are_recoverable() {
        assert!(EngineError::NotFound("button".into()).is_recoverable());
        assert!(
            EngineError::Timeout {
                what: "image 'button'".into(),
                timeout_ms: 100
            }
            .is_recoverable()
        );
        assert!(!EngineError::Device("capture failed".into()).is_recoverable());
        assert!(!EngineError::Validation("bad key".into()).is_recoverable());
        assert!(!EngineError::Halted.is_recoverable());
    }

    #[test]
    fn template_load_failures_are_device_errors() {
        let e: EngineError = DetectError::TemplateLoad {
            path: "images/missing.png".into(),
            message: "No such file".into(),
        }
        .into();
        assert!(matches!(e, EngineError::Device(_)));
        assert!(!e.is_recoverable());
    }
}
