//! Test pipeline
//!
//! One sequential invocation per submission: scan imports, provision a
//! private sandbox, run the tests, release the sandbox, normalize the
//! output. `evaluate` adds the feedback step.

use crate::config::Settings;
use crate::feedback::{self, Feedback, FeedbackError, FeedbackRequester};
use crate::normalizer::{normalize, ResultSummary};
use crate::runner::TestRunner;
use crate::sandbox::{ContainerRuntime, ExecutionError, ProvisioningError, SandboxProvisioner};
use crate::scanner::{scan_imports, PackageSet};
use crate::utils::{with_timeout, TimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Slack on top of the backend's own HTTP timeout
const FEEDBACK_GRACE: Duration = Duration::from_secs(5);

/// A snippet and, optionally, the tests to run against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetSubmission {
    pub source: String,
    /// Without tests the sandbox holds no test module and discovery finds
    /// nothing to run.
    #[serde(default)]
    pub test_code: Option<String>,
}

impl SnippetSubmission {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            test_code: None,
        }
    }

    /// Blank test code is treated as no tests
    pub fn with_tests(mut self, test_code: impl Into<String>) -> Self {
        let test_code = test_code.into();
        self.test_code = (!test_code.trim().is_empty()).then_some(test_code);
        self
    }
}

/// Fatal pipeline errors. Test failures and timeouts are results, not errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Setup(#[from] ProvisioningError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl PipelineError {
    /// The sandbox could not be prepared, so no test ran
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, PipelineError::Setup(_))
    }
}

/// Result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: ResultSummary,
    /// Packages the scanner resolved
    pub packages: PackageSet,
    /// Non-fatal provisioning problems, e.g. failed installs
    pub setup_warnings: Vec<String>,
    pub duration_ms: u64,
}

/// A run plus its review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub report: RunReport,
    pub feedback: Feedback,
}

pub struct Pipeline {
    provisioner: SandboxProvisioner,
    runner: TestRunner,
    feedback_timeout: Duration,
}

impl Pipeline {
    pub fn new(settings: &Settings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            provisioner: SandboxProvisioner::new(runtime, settings.sandbox.clone()),
            runner: TestRunner::new(settings.sandbox.execution_timeout),
            feedback_timeout: Duration::from_secs(settings.feedback.timeout_seconds) + FEEDBACK_GRACE,
        }
    }

    /// Run the submission's tests in a fresh sandbox.
    ///
    /// The sandbox is released before this returns, whether or not the run
    /// succeeded.
    pub async fn run(&self, submission: &SnippetSubmission) -> Result<RunReport, PipelineError> {
        let started = Instant::now();

        let mut packages = scan_imports(&submission.source);
        if let Some(tests) = &submission.test_code {
            packages.extend(scan_imports(tests));
        }

        tracing::info!(
            source_bytes = submission.source.len(),
            has_tests = submission.test_code.is_some(),
            packages = ?packages,
            "Starting test run"
        );

        let handle = self
            .provisioner
            .provision(
                &submission.source,
                submission.test_code.as_deref(),
                &packages,
            )
            .await
            .map_err(|e| {
                tracing::warn!(reason = e.kind(), error = %e, "Sandbox setup failed");
                e
            })?;
        let setup_warnings = handle.warnings().to_vec();

        let result = self.runner.run(&handle).await;
        handle.release().await;
        let raw = result?;

        let summary = normalize(&raw);
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            passed = summary.passed,
            failed = summary.failed,
            errors = summary.errors,
            timed_out = summary.timed_out,
            duration_ms,
            "Test run complete"
        );

        Ok(RunReport {
            summary,
            packages,
            setup_warnings,
            duration_ms,
        })
    }

    /// Run the tests, then ask `requester` for feedback. A failing or slow
    /// backend falls back to [`Feedback::calculated`].
    pub async fn evaluate(
        &self,
        submission: &SnippetSubmission,
        requester: &dyn FeedbackRequester,
    ) -> Result<Evaluation, PipelineError> {
        let report = self.run(submission).await?;

        let requested = with_timeout(
            self.feedback_timeout,
            requester.request(&submission.source, &report.summary),
        )
        .await
        .map_err(|e| match e {
            TimeoutError::Timeout(limit) => FeedbackError::Timeout(limit),
            TimeoutError::Inner(e) => e,
        });

        let mut feedback = match requested {
            Ok(feedback) => feedback,
            Err(e) => {
                tracing::warn!(error = %e, "Feedback generation failed, using calculated feedback");
                Feedback::calculated(&report.summary)
            }
        };
        feedback.score = feedback::score(&report.summary);

        Ok(Evaluation { report, feedback })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::OutcomeStatus;
    use crate::sandbox::fake::{Call, FakeRuntime};
    use crate::sandbox::ExecOutput;
    use async_trait::async_trait;

    const SNIPPET: &str = "def add(a, b):\n    return a + b\n";
    const TESTS: &str = "import unittest\nfrom snippet import add\n";

    const THREE_PASS_ONE_FAIL: &str = "\
test_add (test_snippet.TestCalc.test_add) ... ok
test_div (test_snippet.TestCalc.test_div) ... ok
test_mul (test_snippet.TestCalc.test_mul) ... ok
test_sub (test_snippet.TestCalc.test_sub) ... FAIL

======================================================================
FAIL: test_sub (test_snippet.TestCalc.test_sub)
----------------------------------------------------------------------
Traceback (most recent call last):
  File \"/sandbox/test_snippet.py\", line 14, in test_sub
    self.assertEqual(sub(5, 3), 3)
AssertionError: 2 != 3

----------------------------------------------------------------------
Ran 4 tests in 0.001s

FAILED (failures=1)
";

    fn pipeline(runtime: FakeRuntime) -> (Pipeline, Arc<FakeRuntime>) {
        let runtime = Arc::new(runtime);
        (Pipeline::new(&Settings::default(), runtime.clone()), runtime)
    }

    fn submission() -> SnippetSubmission {
        SnippetSubmission::new(SNIPPET).with_tests(TESTS)
    }

    fn output(stderr: &str, exit_code: Option<i64>, timed_out: bool) -> ExecOutput {
        ExecOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
            timed_out,
        }
    }

    fn execs(runtime: &FakeRuntime) -> usize {
        runtime
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Exec(_)))
            .count()
    }

    struct FailingRequester;

    #[async_trait]
    impl FeedbackRequester for FailingRequester {
        async fn request(&self, _: &str, _: &ResultSummary) -> Result<Feedback, FeedbackError> {
            Err(FeedbackError::EmptyResponse)
        }
    }

    struct FixedRequester;

    #[async_trait]
    impl FeedbackRequester for FixedRequester {
        async fn request(&self, _: &str, _: &ResultSummary) -> Result<Feedback, FeedbackError> {
            Ok(Feedback {
                language: "python3".to_string(),
                score: 0.5,
                scoring_explanation: "reviewed".to_string(),
                issues: Vec::new(),
                ai_generated: true,
            })
        }
    }

    #[test]
    fn test_blank_tests_are_dropped() {
        assert!(SnippetSubmission::new("x = 1").with_tests("  \n").test_code.is_none());
        assert_eq!(
            submission().test_code.as_deref(),
            Some(TESTS),
        );
    }

    #[tokio::test]
    async fn test_run_reports_outcomes_and_releases() {
        let (pipeline, runtime) = pipeline(
            FakeRuntime::new().with_test_output(output(THREE_PASS_ONE_FAIL, Some(1), false)),
        );

        let report = pipeline.run(&submission()).await.unwrap();

        assert_eq!(report.summary.passed, 3);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.errors, 0);
        assert_eq!(report.summary.outcomes[3].status, OutcomeStatus::Failed);
        assert!(report.packages.is_empty());
        assert_eq!(runtime.stopped().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_output_is_not_an_error() {
        let (pipeline, runtime) = pipeline(FakeRuntime::new().with_test_output(output("", Some(0), false)));

        let report = pipeline.run(&SnippetSubmission::new(SNIPPET)).await.unwrap();

        assert_eq!(report.summary.total(), 0);
        assert_eq!(report.summary.leftover, "");
        assert!(!runtime.files().contains_key("/sandbox/test_snippet.py"));
    }

    #[tokio::test]
    async fn test_missing_image_never_runs_tests() {
        let (pipeline, runtime) = pipeline(FakeRuntime::new().without_image());

        let err = pipeline.run(&submission()).await.unwrap_err();

        assert!(err.is_setup_failure());
        assert!(matches!(err, PipelineError::Setup(ProvisioningError::MissingImage(_))));
        assert_eq!(execs(&runtime), 0);
        assert!(runtime.calls().iter().all(|c| !matches!(c, Call::Start(_))));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_outcomes() {
        let partial = "test_a (test_snippet.T.test_a) ... ok\ntest_b (test_snippet.T.test_b) ... FAIL\n";
        let (pipeline, runtime) = pipeline(FakeRuntime::new().with_test_output(output(partial, None, true)));

        let report = pipeline.run(&submission()).await.unwrap();

        assert!(report.summary.timed_out);
        assert_eq!(report.summary.outcomes.len(), 3);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(runtime.stopped().len(), 1);
    }

    #[tokio::test]
    async fn test_execution_error_still_releases() {
        let (pipeline, runtime) = pipeline(FakeRuntime::new().unreachable());

        let err = pipeline.run(&submission()).await.unwrap_err();

        assert!(!err.is_setup_failure());
        assert!(matches!(err, PipelineError::Execution(ExecutionError::BackendUnreachable(_))));
        assert_eq!(runtime.stopped().len(), 1);
    }

    #[tokio::test]
    async fn test_install_failure_surfaces_as_warning() {
        let (pipeline, runtime) = pipeline(FakeRuntime::new().failing_install());
        let submission = SnippetSubmission::new("import numpy as np\n").with_tests(TESTS);

        let report = pipeline.run(&submission).await.unwrap();

        assert!(report.packages.contains("numpy"));
        assert_eq!(report.setup_warnings.len(), 1);
        // pip plus the test command
        assert_eq!(execs(&runtime), 2);
    }

    #[tokio::test]
    async fn test_test_imports_are_installed() {
        let (pipeline, _runtime) = pipeline(FakeRuntime::new());
        let submission = SnippetSubmission::new(SNIPPET).with_tests("import pytest_mock\nimport unittest\n");

        let report = pipeline.run(&submission).await.unwrap();
        assert!(report.packages.contains("pytest_mock"));
    }

    #[tokio::test]
    async fn test_evaluate_falls_back_on_backend_failure() {
        let (pipeline, _runtime) = pipeline(
            FakeRuntime::new().with_test_output(output(THREE_PASS_ONE_FAIL, Some(1), false)),
        );

        let evaluation = pipeline.evaluate(&submission(), &FailingRequester).await.unwrap();

        assert!(!evaluation.feedback.ai_generated);
        assert_eq!(evaluation.feedback.score, 3.75);
        assert_eq!(evaluation.feedback.issues.len(), 1);
    }

    struct SlowRequester;

    #[async_trait]
    impl FeedbackRequester for SlowRequester {
        async fn request(&self, _: &str, _: &ResultSummary) -> Result<Feedback, FeedbackError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(FeedbackError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn test_evaluate_falls_back_on_slow_backend() {
        let (mut pipeline, _runtime) = pipeline(
            FakeRuntime::new().with_test_output(output(THREE_PASS_ONE_FAIL, Some(1), false)),
        );
        pipeline.feedback_timeout = Duration::from_millis(20);

        let evaluation = pipeline.evaluate(&submission(), &SlowRequester).await.unwrap();

        assert!(!evaluation.feedback.ai_generated);
        assert_eq!(evaluation.feedback.score, 3.75);
    }

    #[tokio::test]
    async fn test_evaluate_overrides_backend_score() {
        let (pipeline, _runtime) = pipeline(
            FakeRuntime::new().with_test_output(output(THREE_PASS_ONE_FAIL, Some(1), false)),
        );

        let evaluation = pipeline.evaluate(&submission(), &FixedRequester).await.unwrap();

        assert!(evaluation.feedback.ai_generated);
        assert_eq!(evaluation.feedback.scoring_explanation, "reviewed");
        assert_eq!(evaluation.feedback.score, 3.75);
    }

    #[tokio::test]
    async fn test_evaluate_propagates_setup_failure() {
        let (pipeline, _runtime) = pipeline(FakeRuntime::new().failing_start());
        let err = pipeline.evaluate(&submission(), &FixedRequester).await.unwrap_err();
        assert!(err.is_setup_failure());
    }
}
