//! Error types and reporting for pipeline stages.

use crate::error::VoxError;
use std::fmt;

/// Errors that can occur while a stage or monitor processes work.
#[derive(Debug, Clone, PartialEq)]
pub enum StageError {
    /// Error that leaves the component running (logged and skipped).
    Recoverable(String),
    /// Error that aborts the pipeline.
    Fatal(String),
    /// A context key a stage depends on is absent or holds the wrong type.
    Validation { key: String, expected: &'static str },
}

impl StageError {
    /// Whether this error must stop the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StageError::Recoverable(_))
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StageError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
            StageError::Validation { key, expected } => {
                write!(f, "Validation error: key '{}' missing or not {}", key, expected)
            }
        }
    }
}

impl std::error::Error for StageError {}

impl From<VoxError> for StageError {
    fn from(error: VoxError) -> Self {
        StageError::Fatal(error.to_string())
    }
}

/// Trait for reporting component errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error raised by `component`.
    fn report(&self, component: &str, error: &StageError);
}

/// Reporter that forwards errors to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, component: &str, error: &StageError) {
        if error.is_fatal() {
            tracing::error!(component, %error, "pipeline component failed");
        } else {
            tracing::warn!(component, %error, "pipeline component hit a recoverable error");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let recoverable = StageError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = StageError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");

        let validation = StageError::Validation {
            key: "raw_audio".to_string(),
            expected: "Utterance",
        };
        assert_eq!(
            validation.to_string(),
            "Validation error: key 'raw_audio' missing or not Utterance"
        );
    }

    #[test]
    fn test_only_recoverable_is_not_fatal() {
        assert!(!StageError::Recoverable("x".into()).is_fatal());
        assert!(StageError::Fatal("x".into()).is_fatal());
        assert!(
            StageError::Validation {
                key: "k".into(),
                expected: "u32"
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_vox_error_converts_to_fatal() {
        let error: StageError = VoxError::Synthesis {
            message: "voice missing".to_string(),
        }
        .into();
        assert_eq!(
            error,
            StageError::Fatal("Synthesis error: voice missing".to_string())
        );
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        // Just ensure it doesn't panic
        reporter.report("TestStage", &StageError::Recoverable("test error".to_string()));
        reporter.report("TestStage", &StageError::Fatal("test error".to_string()));
    }
}
