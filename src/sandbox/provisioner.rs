//! Sandbox provisioning
//!
//! Starts a fresh container from the base image, places the snippet and its
//! tests at fixed paths, and installs the scanned packages into a directory
//! private to that container.

use super::errors::{ProvisioningError, RuntimeError};
use super::handle::SandboxHandle;
use super::runtime::{ContainerRuntime, ContainerSpec, ExecRequest};
use crate::config::SandboxConfig;
use crate::scanner::PackageSet;
use crate::utils::truncate_with_suffix;
use std::sync::Arc;
use std::time::Duration;

/// Directory the snippet and tests are written to
pub const WORKSPACE_DIR: &str = "/sandbox";

/// File name of the submitted snippet
pub const SNIPPET_FILE: &str = "snippet.py";

/// File name of the submitted tests
pub const TEST_FILE: &str = "test_snippet.py";

/// Install target for scanned packages. Lives in the container, not the image.
pub const PACKAGES_DIR: &str = "/tmp/sandbox-packages";

/// Extra time the host waits on top of the in-container install timeout
const INSTALL_GRACE: Duration = Duration::from_secs(5);

/// Exit codes coreutils `timeout` reports when it stops the command
const TIMEOUT_EXIT_CODES: [i64; 2] = [124, 137];

/// Materializes sandboxes for single submissions
pub struct SandboxProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
}

impl SandboxProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    /// Provision a sandbox holding `source` and `test_code`.
    ///
    /// Package installation problems are recorded on the handle as warnings.
    /// Any fatal error after the container started tears it down before
    /// returning.
    pub async fn provision(
        &self,
        source: &str,
        test_code: Option<&str>,
        packages: &PackageSet,
    ) -> Result<SandboxHandle, ProvisioningError> {
        match self.runtime.image_exists(&self.config.image).await {
            Ok(true) => {}
            Ok(false) => return Err(ProvisioningError::MissingImage(self.config.image.clone())),
            Err(e) => return Err(ProvisioningError::StartFailed(e.to_string())),
        }

        let network_enabled = !packages.is_empty() && self.config.install_network;
        let spec = self.container_spec(network_enabled);

        let container_id = self.runtime.start(&spec).await.map_err(|e| match e {
            RuntimeError::ImageNotFound(_) => {
                ProvisioningError::MissingImage(self.config.image.clone())
            }
            other => ProvisioningError::StartFailed(other.to_string()),
        })?;

        tracing::info!(
            container_id = %container_id,
            image = %self.config.image,
            packages = packages.len(),
            network_enabled,
            "Sandbox container started"
        );

        let mut handle = SandboxHandle::new(container_id, Arc::clone(&self.runtime));

        if let Err(e) = self
            .prepare(&mut handle, source, test_code, packages, network_enabled)
            .await
        {
            tracing::warn!(container_id = %handle.id(), error = %e, "Sandbox preparation failed");
            handle.release().await;
            return Err(e);
        }

        Ok(handle)
    }

    fn container_spec(&self, network_enabled: bool) -> ContainerSpec {
        ContainerSpec {
            name: format!("snippet_sandbox_{}", uuid::Uuid::new_v4().simple()),
            image: self.config.image.clone(),
            user: self.config.user.clone(),
            working_dir: WORKSPACE_DIR.to_string(),
            memory_limit: self.config.memory_limit_bytes(),
            cpu_period: self.config.cpu_period,
            cpu_quota: self.config.cpu_quota,
            network_enabled,
        }
    }

    async fn prepare(
        &self,
        handle: &mut SandboxHandle,
        source: &str,
        test_code: Option<&str>,
        packages: &PackageSet,
        network_enabled: bool,
    ) -> Result<(), ProvisioningError> {
        self.place(handle, SNIPPET_FILE, source).await?;
        if let Some(tests) = test_code {
            self.place(handle, TEST_FILE, tests).await?;
        }

        if !packages.is_empty() {
            if let Err(e) = self.install(handle, packages, network_enabled).await {
                tracing::warn!(container_id = %handle.id(), error = %e, "Continuing without packages");
                handle.push_warning(e.to_string());
            }
        }

        if network_enabled {
            handle
                .runtime()
                .isolate_network(handle.id())
                .await
                .map_err(|e| {
                    ProvisioningError::StartFailed(format!("failed to isolate network: {}", e))
                })?;
        }

        Ok(())
    }

    async fn place(
        &self,
        handle: &SandboxHandle,
        file_name: &str,
        content: &str,
    ) -> Result<(), ProvisioningError> {
        let path = format!("{}/{}", WORKSPACE_DIR, file_name);
        handle
            .runtime()
            .write_file(handle.id(), &path, content.as_bytes())
            .await
            .map_err(|e| ProvisioningError::StartFailed(format!("failed to write {}: {}", path, e)))
    }

    async fn install(
        &self,
        handle: &SandboxHandle,
        packages: &PackageSet,
        network_enabled: bool,
    ) -> Result<(), ProvisioningError> {
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();

        if !network_enabled {
            return Err(ProvisioningError::InstallFailed(format!(
                "network disabled, skipped {}",
                names.join(", ")
            )));
        }

        let request = install_request(&names, self.config.install_timeout);
        tracing::debug!(container_id = %handle.id(), packages = ?names, "Installing packages");

        let output = handle
            .runtime()
            .exec(handle.id(), &request)
            .await
            .map_err(|e| ProvisioningError::InstallFailed(e.to_string()))?;

        let timed_out = output.timed_out
            || output
                .exit_code
                .map(|code| TIMEOUT_EXIT_CODES.contains(&code))
                .unwrap_or(false);

        if timed_out {
            return Err(ProvisioningError::InstallFailed(format!(
                "pip timed out after {}s installing {}",
                self.config.install_timeout.as_secs(),
                names.join(", ")
            )));
        }

        match output.exit_code {
            Some(0) => Ok(()),
            code => {
                let detail = output
                    .stderr
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("no output");
                Err(ProvisioningError::InstallFailed(format!(
                    "pip exited with {:?}: {}",
                    code,
                    truncate_with_suffix(detail.trim(), 200, "...")
                )))
            }
        }
    }
}

/// Build the pip command, bounded in-container by coreutils `timeout`
fn install_request(packages: &[&str], timeout: Duration) -> ExecRequest {
    let mut cmd: Vec<String> = [
        "timeout",
        "-s",
        "KILL",
        &timeout.as_secs().max(1).to_string(),
        "python",
        "-m",
        "pip",
        "install",
        "--quiet",
        "--no-cache-dir",
        "--disable-pip-version-check",
        "--target",
        PACKAGES_DIR,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    cmd.extend(packages.iter().map(|p| p.to_string()));

    ExecRequest {
        cmd,
        env: vec!["HOME=/tmp".to_string(), "PIP_NO_INPUT=1".to_string()],
        working_dir: WORKSPACE_DIR.to_string(),
        timeout: timeout + INSTALL_GRACE,
    }
}
