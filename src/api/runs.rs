//! Test run endpoint
//!
//! `POST /v1/runs` runs a snippet's tests in a fresh sandbox and returns the
//! structured result, optionally with feedback.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::error::ApiError;
use crate::feedback::Feedback;
use crate::pipeline::{RunReport, SnippetSubmission};
use crate::server::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    /// Snippet source
    pub source: String,

    /// Test module source
    #[serde(default)]
    pub test_code: Option<String>,

    /// Also request feedback
    #[serde(default)]
    pub feedback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub report: RunReport,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

// ============================================================================
// Handler Implementation
// ============================================================================

/// POST /v1/runs - Run a snippet's tests
///
/// Test failures are a normal `200` response. Setup failures map to `424`,
/// an unreachable Docker daemon to `503`.
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let start_time = Instant::now();
    let run_id = Uuid::new_v4().to_string();

    if request.source.trim().is_empty() {
        return Err(ApiError::InvalidRequest("source must not be empty".to_string()));
    }

    tracing::info!(
        run_id = %run_id,
        source_bytes = request.source.len(),
        has_tests = request.test_code.is_some(),
        feedback = request.feedback,
        "Processing run request"
    );

    let submission = SnippetSubmission {
        source: request.source,
        test_code: request.test_code.filter(|t| !t.trim().is_empty()),
    };

    let response = if request.feedback {
        let evaluation = state
            .pipeline
            .evaluate(&submission, state.feedback.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(run_id = %run_id, error = %e, "Run failed");
                ApiError::from(e)
            })?;
        RunResponse {
            report: evaluation.report,
            feedback: Some(evaluation.feedback),
        }
    } else {
        let report = state.pipeline.run(&submission).await.map_err(|e| {
            tracing::error!(run_id = %run_id, error = %e, "Run failed");
            ApiError::from(e)
        })?;
        RunResponse {
            report,
            feedback: None,
        }
    };

    tracing::info!(
        run_id = %run_id,
        passed = response.report.summary.passed,
        failed = response.report.summary.failed,
        errors = response.report.summary.errors,
        duration_ms = start_time.elapsed().as_millis() as u64,
        "Run request completed"
    );

    Ok(Json(response))
}
