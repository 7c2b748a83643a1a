//! Error types for execution orchestration and configuration.
//!
//! `ExecutionError` is what a caller of `submit` receives. Its variants follow
//! the lifecycle consequence of the failure: load and timeout failures are
//! terminal for the host (it gets rebuilt) but never for the coordinator, while
//! guest and cancellation failures only end the one request.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Runtime failed to load: {message}")]
    Load { message: String },
    #[error(
        "⏱ Execution timed out after {} seconds. Your code may contain an infinite loop.",
        .timeout.as_secs_f64()
    )]
    Timeout { timeout: Duration },
    #[error("{message}")]
    Guest {
        message: String,
        partial_stdout: String,
    },
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Failed to send code to host: {0}")]
    Transport(String),
    #[error("Coordinator not initialized. Call init() first.")]
    NotInitialized,
    #[error("Another execution is already in progress")]
    Busy,
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }

    /// Output captured before the failure, empty when none survived.
    pub fn partial_stdout(&self) -> &str {
        match self {
            ExecutionError::Guest { partial_stdout, .. } => partial_stdout,
            _ => "",
        }
    }
}

#[derive(Error, Debug)]
pub enum PolyrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl From<std::io::Error> for PolyrunError {
    fn from(err: std::io::Error) -> Self {
        PolyrunError::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_budget() {
        let err = ExecutionError::Timeout {
            timeout: Duration::from_millis(10_000),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out after 10 seconds"));
        assert_eq!(err.partial_stdout(), "");
    }

    #[test]
    fn test_guest_error_keeps_partial_output() {
        let err = ExecutionError::Guest {
            message: "ValueError: bad".to_string(),
            partial_stdout: "x\n".to_string(),
        };
        assert!(!err.is_timeout());
        assert_eq!(err.partial_stdout(), "x\n");
        assert_eq!(err.to_string(), "ValueError: bad");
    }
}
