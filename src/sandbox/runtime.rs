//! Container runtime interface
//!
//! The provisioner and the test runner talk to containers only through
//! [`ContainerRuntime`], so the Docker backend can be swapped for an
//! in-memory fake in tests.

use super::errors::RuntimeError;
use async_trait::async_trait;
use std::time::Duration;

/// Parameters for starting a sandbox container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image to start from
    pub image: String,
    /// User the container processes run as (`uid[:gid]` or a name)
    pub user: Option<String>,
    /// Working directory, created by the runtime if missing
    pub working_dir: String,
    /// Memory limit in bytes
    pub memory_limit: i64,
    /// CPU period in microseconds
    pub cpu_period: i64,
    /// CPU quota in microseconds
    pub cpu_quota: i64,
    /// Attach the default network at start. Otherwise the container starts
    /// with networking disabled.
    pub network_enabled: bool,
}

/// A command to run inside a started container
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub working_dir: String,
    /// Hard wall-clock deadline measured from exec start
    pub timeout: Duration,
}

/// Captured result of an exec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed before reporting a code
    pub exit_code: Option<i64>,
    pub timed_out: bool,
}

/// Backend capable of hosting sandbox containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Check whether an image is present locally
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Create and start a container, returning its id
    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Write a file at an absolute path inside the container
    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(), RuntimeError>;

    /// Run a command, enforcing `request.timeout`.
    ///
    /// On expiry the process is killed and whatever output was captured so
    /// far is returned with `timed_out` set. Expiry is not an error.
    async fn exec(&self, container_id: &str, request: &ExecRequest)
        -> Result<ExecOutput, RuntimeError>;

    /// Disconnect the container from every network
    async fn isolate_network(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Stop and remove the container. Safe to call on a container that is
    /// already gone.
    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;
}
