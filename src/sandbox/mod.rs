//! Docker sandbox
//!
//! Provisioning and lifetime management of the isolated containers that
//! snippets run in.

pub mod docker;
pub mod errors;
pub mod handle;
pub mod provisioner;
pub mod runtime;

#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;
pub use errors::{ExecutionError, ProvisioningError, RuntimeError};
pub use handle::SandboxHandle;
pub use provisioner::{
    SandboxProvisioner, PACKAGES_DIR, SNIPPET_FILE, TEST_FILE, WORKSPACE_DIR,
};
pub use runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};
