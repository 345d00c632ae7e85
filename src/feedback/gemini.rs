//! Gemini feedback backend
//!
//! One `generateContent` call per submission over REST. No retries.

use super::{build_prompt, parse_feedback, Feedback, FeedbackError, FeedbackRequester};
use crate::config::FeedbackConfig;
use crate::normalizer::ResultSummary;
use crate::schemas::gemini::{GeminiContent, GeminiError, GeminiRequest, GeminiResponse, GenerationConfig};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const SYSTEM_INSTRUCTION: &str =
    "You review Python code and its unit test results. Reply with a single JSON object.";

/// Feedback requester backed by Google Gemini
#[derive(Clone)]
pub struct GeminiFeedback {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiFeedback {
    /// Create a requester. Fails when no API key is configured.
    pub fn new(config: &FeedbackConfig) -> Result<Self, FeedbackError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| FeedbackError::NotConfigured("GOOGLE_API_KEY is not set".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        tracing::info!(model = %config.model, "Initialized Gemini feedback backend");

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(prompt: String) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent::user(prompt)],
            system_instruction: Some(GeminiContent::system(SYSTEM_INSTRUCTION)),
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                max_output_tokens: Some(2048),
                response_mime_type: Some("application/json".to_string()),
            }),
        }
    }

    /// Send the prompt and return the reply text
    async fn generate(&self, prompt: String) -> Result<String, FeedbackError> {
        let url = self.endpoint();

        tracing::debug!(model = %self.model, url = %url, "Calling Gemini generateContent API");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&Self::request_body(prompt))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();

            if let Ok(gemini_error) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(FeedbackError::ApiError {
                    code: gemini_error.error.code,
                    message: gemini_error.error.message,
                });
            }

            return Err(FeedbackError::ApiError {
                code: status.as_u16() as i32,
                message: error_text,
            });
        }

        let response_text = resp.text().await?;
        let response: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Gemini response");
            FeedbackError::ParseError(e.to_string())
        })?;

        if let Some(usage) = &response.usage_metadata {
            tracing::debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        response.text().ok_or(FeedbackError::EmptyResponse)
    }
}

impl std::fmt::Debug for GeminiFeedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiFeedback")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FeedbackRequester for GeminiFeedback {
    async fn request(
        &self,
        source: &str,
        summary: &ResultSummary,
    ) -> Result<Feedback, FeedbackError> {
        let text = self.generate(build_prompt(source, summary)).await?;
        parse_feedback(&text, summary)
    }
}

// ============================================================================
// Tests
// ============================================================================
