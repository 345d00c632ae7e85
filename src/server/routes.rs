//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{health, runs};
use crate::middleware::logging::{log_request, REQUEST_ID_HEADER, TRACE_ID_HEADER};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness));

    let api_routes = Router::new().route("/runs", post(runs::create_run));

    Router::new()
        .nest("/v1", api_routes)
        .merge(health_routes)
        // first added = innermost
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings for development
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::feedback::CalculatedFeedback;
    use crate::sandbox::fake::FakeRuntime;
    use crate::sandbox::ExecOutput;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(runtime: FakeRuntime) -> Router {
        create_router(AppState::with_runtime(
            Settings::default(),
            Arc::new(runtime),
            Arc::new(CalculatedFeedback),
        ))
    }

    fn post_run(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/runs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_run_returns_report() {
        let runtime = FakeRuntime::new().with_test_output(ExecOutput {
            stdout: String::new(),
            stderr: "test_a (test_snippet.T.test_a) ... ok\ntest_b (test_snippet.T.test_b) ... FAIL\n"
                .to_string(),
            exit_code: Some(1),
            timed_out: false,
        });

        let response = router(runtime)
            .oneshot(post_run(serde_json::json!({
                "source": "x = 1",
                "test_code": "import unittest",
                "feedback": true
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(TRACE_ID_HEADER));

        let body = json_body(response).await;
        assert_eq!(body["report"]["summary"]["passed"], 1);
        assert_eq!(body["report"]["summary"]["failed"], 1);
        assert_eq!(body["report"]["summary"]["outcomes"][1]["status"], "failed");
        assert_eq!(body["feedback"]["score"], 2.5);
        assert_eq!(body["feedback"]["ai_generated"], false);
    }

    #[tokio::test]
    async fn test_feedback_omitted_unless_requested() {
        let response = router(FakeRuntime::new())
            .oneshot(post_run(serde_json::json!({"source": "x = 1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body.get("feedback").is_none());
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let response = router(FakeRuntime::new())
            .oneshot(post_run(serde_json::json!({"source": "   "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_missing_image_is_failed_dependency() {
        let response = router(FakeRuntime::new().without_image())
            .oneshot(post_run(serde_json::json!({"source": "x = 1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "setup_error");
    }

    #[tokio::test]
    async fn test_unreachable_docker_is_unavailable() {
        let response = router(FakeRuntime::new().unreachable())
            .oneshot(post_run(serde_json::json!({"source": "x = 1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "backend_unavailable");
    }

    #[tokio::test]
    async fn test_readiness_reflects_docker() {
        let ready = router(FakeRuntime::new())
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);

        let down = router(FakeRuntime::new().unreachable())
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(down).await;
        assert_eq!(body["checks"]["docker"], false);
    }

    #[tokio::test]
    async fn test_liveness_and_trace_id_propagation() {
        let response = router(FakeRuntime::new())
            .oneshot(
                Request::get("/liveness")
                    .header(TRACE_ID_HEADER, "trace-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[TRACE_ID_HEADER], "trace-123");
    }
}
