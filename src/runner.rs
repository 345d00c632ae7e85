//! Test runner
//!
//! Runs the fixed unittest discovery command inside a provisioned sandbox
//! and captures its raw output.

use crate::sandbox::{
    ExecRequest, ExecutionError, SandboxHandle, PACKAGES_DIR, WORKSPACE_DIR,
};
use std::time::{Duration, Instant};

/// Discovery pattern for test modules inside the workspace
pub const TEST_PATTERN: &str = "test*.py";

/// Raw output of one test run
#[derive(Debug, Clone, PartialEq)]
pub struct RawExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed before reporting a code
    pub exit_code: Option<i64>,
    /// Wall-clock time from exec start to completion or kill
    pub duration: Duration,
    pub timed_out: bool,
    /// Deadline the run was held to
    pub timeout: Duration,
}

impl RawExecutionResult {
    /// Exit code 0 and no timeout. Does not by itself mean tests ran: the
    /// output still has to be parsed.
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Executes the test command against a sandbox
#[derive(Debug, Clone)]
pub struct TestRunner {
    timeout: Duration,
}

impl TestRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The command and environment the runner execs
    pub fn request(&self) -> ExecRequest {
        ExecRequest {
            cmd: [
                "python", "-m", "unittest", "discover", "-v", "-s", WORKSPACE_DIR, "-p",
                TEST_PATTERN,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            env: vec![
                format!("PYTHONPATH={}:{}", PACKAGES_DIR, WORKSPACE_DIR),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
                "PYTHONUNBUFFERED=1".to_string(),
                "HOME=/tmp".to_string(),
            ],
            working_dir: WORKSPACE_DIR.to_string(),
            timeout: self.timeout,
        }
    }

    /// Run the tests. A timeout is reported in the result, never as an error.
    pub async fn run(&self, handle: &SandboxHandle) -> Result<RawExecutionResult, ExecutionError> {
        let request = self.request();
        let started = Instant::now();

        let output = handle.runtime().exec(handle.id(), &request).await?;
        let raw = RawExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration: started.elapsed(),
            timed_out: output.timed_out,
            timeout: self.timeout,
        };

        tracing::info!(
            container_id = %handle.id(),
            exit_code = ?raw.exit_code,
            timed_out = raw.timed_out,
            clean_exit = raw.exited_cleanly(),
            duration_ms = raw.duration.as_millis() as u64,
            stdout_bytes = raw.stdout.len(),
            stderr_bytes = raw.stderr.len(),
            "Test command finished"
        );

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeRuntime;
    use crate::sandbox::{ContainerRuntime, ExecOutput};
    use std::sync::Arc;

    fn handle(runtime: &Arc<FakeRuntime>) -> SandboxHandle {
        SandboxHandle::new("fake-1".to_string(), runtime.clone())
    }

    #[test]
    fn test_request_is_fixed_discovery_command() {
        let request = TestRunner::new(Duration::from_secs(10)).request();
        assert_eq!(
            request.cmd.join(" "),
            "python -m unittest discover -v -s /sandbox -p test*.py"
        );
        assert!(request
            .env
            .contains(&"PYTHONPATH=/tmp/sandbox-packages:/sandbox".to_string()));
        assert_eq!(request.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_captures_streams_separately() {
        let runtime = Arc::new(FakeRuntime::new().with_test_output(ExecOutput {
            stdout: "printed\n".to_string(),
            stderr: "test_a (test_snippet.T.test_a) ... ok\n".to_string(),
            exit_code: Some(0),
            timed_out: false,
        }));
        let handle = handle(&runtime);

        let raw = TestRunner::new(Duration::from_secs(5)).run(&handle).await.unwrap();
        assert_eq!(raw.stdout, "printed\n");
        assert!(raw.stderr.contains("... ok"));
        assert!(raw.exited_cleanly());
        handle.release().await;
    }

    #[tokio::test]
    async fn test_timeout_is_a_result() {
        let runtime = Arc::new(FakeRuntime::new().with_test_output(ExecOutput {
            stdout: String::new(),
            stderr: "test_a (test_snippet.T.test_a) ... ok\n".to_string(),
            exit_code: None,
            timed_out: true,
        }));
        let handle = handle(&runtime);

        let raw = TestRunner::new(Duration::from_secs(2)).run(&handle).await.unwrap();
        assert!(raw.timed_out);
        assert_eq!(raw.timeout, Duration::from_secs(2));
        assert!(!raw.exited_cleanly());
        handle.release().await;
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_fatal() {
        let runtime = Arc::new(FakeRuntime::new().unreachable());
        let handle = handle(&runtime);

        let err = TestRunner::new(Duration::from_secs(2)).run(&handle).await.unwrap_err();
        assert!(matches!(err, ExecutionError::BackendUnreachable(_)));
        handle.release().await;
    }

    #[tokio::test]
    async fn test_removed_container_is_reported() {
        let runtime = Arc::new(FakeRuntime::new());
        let handle = handle(&runtime);
        runtime.stop(handle.id()).await.unwrap();

        let err = TestRunner::new(Duration::from_secs(2)).run(&handle).await.unwrap_err();
        assert!(matches!(err, ExecutionError::SandboxReleased(_)));
        handle.release().await;
    }
}
