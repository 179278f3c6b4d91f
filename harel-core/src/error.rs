//! Core error types.

use thiserror::Error;

/// Errors from chart construction and the resolution engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid chart definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("unknown target '{target}' referenced from state '{state}'")]
    UnknownTarget { state: String, target: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("unknown service: {name}")]
    UnknownService { name: String },

    #[error("unknown state: {id}")]
    UnknownState { id: String },

    #[error("chart invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("macrostep exceeded {limit} microsteps")]
    MicrostepLimit { limit: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns true for errors caused by a faulty chart definition.
    pub fn is_authoring_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidDefinition { .. }
                | CoreError::UnknownTarget { .. }
                | CoreError::InvalidGuard { .. }
                | CoreError::UnknownService { .. }
                | CoreError::Json(_)
        )
    }

    /// Returns a stable error code for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::UnknownService { .. } => "UNKNOWN_SERVICE",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            CoreError::MicrostepLimit { .. } => "MICROSTEP_LIMIT",
            CoreError::Json(_) => "BAD_DEFINITION_JSON",
        }
    }
}

/// Failure raised by an action closure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of an invoked service that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authoring_errors() {
        let err = CoreError::UnknownTarget {
            state: "root.a".to_string(),
            target: "missing".to_string(),
        };
        assert!(err.is_authoring_error());
        assert_eq!(err.error_code(), "UNKNOWN_TARGET");

        let err = CoreError::MicrostepLimit { limit: 10 };
        assert!(!err.is_authoring_error());
        assert_eq!(err.to_string(), "macrostep exceeded 10 microsteps");
    }
}
