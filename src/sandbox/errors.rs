//! Sandbox error types
//!
//! Provisioning failures abort a submission before any test runs and are
//! reported as setup failures. Execution failures are the fatal conditions
//! of the test run itself. Timeouts are not errors.

use thiserror::Error;

/// Errors raised while preparing a sandbox.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The base image is not present on the Docker host
    #[error("Sandbox image not found: {0}")]
    MissingImage(String),

    /// The container could not be created, started or populated
    #[error("Failed to start sandbox: {0}")]
    StartFailed(String),

    /// Package installation failed. Recorded as a warning, never returned
    /// from the provisioner.
    #[error("Failed to install packages: {0}")]
    InstallFailed(String),
}

impl ProvisioningError {
    /// Short machine-readable reason
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisioningError::MissingImage(_) => "missing_image",
            ProvisioningError::StartFailed(_) => "start_failed",
            ProvisioningError::InstallFailed(_) => "install_failed",
        }
    }
}

/// Errors raised by the container runtime while the tests run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The handle was already released
    #[error("Sandbox already released: {0}")]
    SandboxReleased(String),

    /// The Docker daemon could not be reached
    #[error("Execution backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The exec instance could not be created or inspected
    #[error("Failed to execute command: {0}")]
    ExecFailed(String),
}

/// Errors from a single runtime operation, before the provisioner or runner
/// decides what they mean for the submission.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Docker not available: {0}")]
    Unavailable(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Docker image not found: {0}")]
    ImageNotFound(String),

    #[error("Docker request failed: {0}")]
    Request(String),
}

impl From<RuntimeError> for ExecutionError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => ExecutionError::BackendUnreachable(msg),
            RuntimeError::NotFound(id) => ExecutionError::SandboxReleased(id),
            RuntimeError::ImageNotFound(msg) | RuntimeError::Request(msg) => {
                ExecutionError::ExecFailed(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failure_kinds() {
        assert_eq!(ProvisioningError::StartFailed("boom".to_string()).kind(), "start_failed");
        assert_eq!(ProvisioningError::InstallFailed("pip".to_string()).kind(), "install_failed");
    }

    #[test]
    fn test_runtime_error_mapping() {
        let err: ExecutionError = RuntimeError::Unavailable("socket".to_string()).into();
        assert!(matches!(err, ExecutionError::BackendUnreachable(_)));

        let err: ExecutionError = RuntimeError::NotFound("abc".to_string()).into();
        assert!(matches!(err, ExecutionError::SandboxReleased(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ProvisioningError::MissingImage("python:3.11-slim".to_string());
        assert_eq!(err.to_string(), "Sandbox image not found: python:3.11-slim");
        assert_eq!(err.kind(), "missing_image");
    }
}
