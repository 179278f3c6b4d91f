//! Runtime error types.

use crate::config::ConfigError;
use crate::instance::InstanceStatus;
use harel_core::{CoreError, Fault};
use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("instance already started")]
    AlreadyStarted,

    #[error("instance not started")]
    NotStarted,

    #[error("instance is {status}")]
    Terminated { status: InstanceStatus },

    #[error("instance faulted: {message}")]
    Execution { message: String },

    #[error("service '{service_id}' failed: {message}")]
    ServiceFailed { service_id: String, message: String },

    #[error("no tokio runtime available to run services")]
    NoRuntime,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Returns a stable error code for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::AlreadyStarted => "ALREADY_STARTED",
            RuntimeError::NotStarted => "NOT_STARTED",
            RuntimeError::Terminated { .. } => "TERMINATED",
            RuntimeError::Execution { .. } => "EXECUTION_ERROR",
            RuntimeError::ServiceFailed { .. } => "SERVICE_FAILED",
            RuntimeError::NoRuntime => "NO_RUNTIME",
            RuntimeError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<Fault> for RuntimeError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Execution { message } => RuntimeError::Execution { message },
            Fault::Service {
                service_id,
                message,
            } => RuntimeError::ServiceFailed {
                service_id,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RuntimeError::from(CoreError::MicrostepLimit { limit: 5 });
        assert_eq!(err.error_code(), "MICROSTEP_LIMIT");

        let err = RuntimeError::Terminated {
            status: InstanceStatus::Completed,
        };
        assert_eq!(err.error_code(), "TERMINATED");
        assert_eq!(err.to_string(), "instance is completed");
    }

    #[test]
    fn test_from_fault() {
        let err = RuntimeError::from(Fault::Service {
            service_id: "fetch".to_string(),
            message: "timeout".to_string(),
        });
        assert!(matches!(err, RuntimeError::ServiceFailed { .. }));
        assert_eq!(err.to_string(), "service 'fetch' failed: timeout");
    }
}
