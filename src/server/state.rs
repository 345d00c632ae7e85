//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::config::Settings;
use crate::feedback::{CalculatedFeedback, FeedbackRequester, GeminiFeedback};
use crate::pipeline::Pipeline;
use crate::sandbox::{ContainerRuntime, DockerRuntime};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Container runtime, also used by the readiness probe
    pub runtime: Arc<dyn ContainerRuntime>,

    /// Test pipeline. Each request provisions its own sandbox.
    pub pipeline: Arc<Pipeline>,

    /// Feedback backend, or the calculated fallback when none is configured
    pub feedback: Arc<dyn FeedbackRequester>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Create state backed by the local Docker daemon
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let docker = DockerRuntime::local()?;
        match docker.version().await {
            Ok(version) => tracing::info!(docker = %version, "Connected to Docker"),
            Err(e) => tracing::warn!(error = %e, "Docker not reachable yet, runs will fail until it is"),
        }

        let feedback: Arc<dyn FeedbackRequester> = if settings.feedback.is_configured() {
            Arc::new(GeminiFeedback::new(&settings.feedback)?)
        } else {
            tracing::info!("GOOGLE_API_KEY not set, feedback will be calculated from test results");
            Arc::new(CalculatedFeedback)
        };

        let state = Self::with_runtime(settings, Arc::new(docker), feedback);
        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Create state from explicit collaborators
    pub fn with_runtime(
        settings: Settings,
        runtime: Arc<dyn ContainerRuntime>,
        feedback: Arc<dyn FeedbackRequester>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(&settings, Arc::clone(&runtime)));

        Self {
            settings: Arc::new(settings),
            runtime,
            pipeline,
            feedback,
            start_time: Instant::now(),
        }
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether the container runtime answers
    pub async fn docker_healthy(&self) -> bool {
        match self.runtime.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Docker ping failed");
                false
            }
        }
    }
}
