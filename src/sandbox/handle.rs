//! Scoped ownership of a running sandbox container

use super::runtime::ContainerRuntime;
use std::sync::Arc;

/// A provisioned, running sandbox.
///
/// Call [`SandboxHandle::release`] when the run is over. A handle that is
/// dropped without being released (early return, panic, cancelled future)
/// schedules the teardown on the current tokio runtime instead.
pub struct SandboxHandle {
    container_id: String,
    runtime: Arc<dyn ContainerRuntime>,
    created_at: chrono::DateTime<chrono::Utc>,
    warnings: Vec<String>,
    released: bool,
}

impl SandboxHandle {
    pub(crate) fn new(container_id: String, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            container_id,
            runtime,
            created_at: chrono::Utc::now(),
            warnings: Vec::new(),
            released: false,
        }
    }

    /// Container id
    pub fn id(&self) -> &str {
        &self.container_id
    }

    /// Non-fatal problems recorded while provisioning
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub(crate) fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Tear the container down. Errors are logged, never returned: there is
    /// nothing a caller could do with them.
    pub async fn release(mut self) {
        self.released = true;
        let lifetime_ms = (chrono::Utc::now() - self.created_at).num_milliseconds();
        match self.runtime.stop(&self.container_id).await {
            Ok(()) => tracing::debug!(container_id = %self.container_id, lifetime_ms, "Sandbox released"),
            Err(e) => tracing::warn!(
                container_id = %self.container_id,
                error = %e,
                "Failed to remove sandbox container"
            ),
        }
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let container_id = std::mem::take(&mut self.container_id);
        let runtime = Arc::clone(&self.runtime);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(container_id = %container_id, "Sandbox dropped without release, scheduling teardown");
                handle.spawn(async move {
                    if let Err(e) = runtime.stop(&container_id).await {
                        tracing::warn!(container_id = %container_id, error = %e, "Deferred sandbox teardown failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(container_id = %container_id, "Sandbox leaked: no runtime available for teardown");
            }
        }
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("container_id", &self.container_id)
            .field("created_at", &self.created_at)
            .field("warnings", &self.warnings)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeRuntime;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_stops_container_once() {
        let runtime = Arc::new(FakeRuntime::new());
        let handle = SandboxHandle::new("c1".to_string(), runtime.clone());
        handle.release().await;

        tokio::task::yield_now().await;
        assert_eq!(runtime.stopped(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_schedules_teardown() {
        let runtime = Arc::new(FakeRuntime::new());
        {
            let _handle = SandboxHandle::new("c2".to_string(), runtime.clone());
        }

        for _ in 0..10 {
            if !runtime.stopped().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runtime.stopped(), vec!["c2".to_string()]);
    }

    #[test]
    fn test_warnings_accumulate() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut handle = SandboxHandle::new("c3".to_string(), runtime);
        handle.push_warning("pip failed");
        assert_eq!(handle.warnings(), &["pip failed".to_string()]);
        // No runtime here: the drop only logs.
    }
}
