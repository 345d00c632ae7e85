//! Feedback requester
//!
//! Qualitative review of a snippet from a generative-text backend. The
//! score is always derived from the test results; the backend only
//! contributes the explanation and the issue list.

pub mod gemini;

use crate::normalizer::{OutcomeStatus, ResultSummary};
use crate::utils::truncate_with_suffix;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use gemini::GeminiFeedback;

/// Maximum score, reached when every outcome passed
pub const MAX_SCORE: f64 = 5.0;

const FEEDBACK_LANGUAGE: &str = "python3";
const PROMPT_SOURCE_LIMIT: usize = 20_000;
const PROMPT_LEFTOVER_LIMIT: usize = 4_000;
const PROMPT_MESSAGE_LIMIT: usize = 500;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while requesting feedback
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Feedback backend not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    #[error("Feedback backend returned no text")]
    EmptyResponse,

    #[error("Failed to parse feedback: {0}")]
    ParseError(String),

    #[error("Feedback request timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Feedback Types
// ============================================================================

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

// Backends are loose with casing and vocabulary; anything unknown is Medium.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(Severity::Medium))
    }
}

/// One reviewed problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub fix: String,
}

/// Review of a snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub language: String,
    /// 0.0 to 5.0, derived from the pass rate
    pub score: f64,
    pub scoring_explanation: String,
    pub issues: Vec<Issue>,
    /// False for the deterministic fallback
    pub ai_generated: bool,
}

impl Feedback {
    /// Deterministic feedback computed from the summary alone
    pub fn calculated(summary: &ResultSummary) -> Self {
        let issues = summary
            .outcomes
            .iter()
            .filter(|o| o.status != OutcomeStatus::Passed)
            .map(|o| Issue {
                description: match &o.message {
                    Some(message) => format!(
                        "{} {}: {}",
                        o.name,
                        o.status,
                        message.lines().last().unwrap_or(message.as_str())
                    ),
                    None => format!("{} {}", o.name, o.status),
                },
                severity: match o.status {
                    OutcomeStatus::Error => Severity::High,
                    _ => Severity::Medium,
                },
                fix: "Review the failing test output and correct the code under test.".to_string(),
            })
            .collect();

        Self {
            language: FEEDBACK_LANGUAGE.to_string(),
            score: score(summary),
            scoring_explanation: format!(
                "Basic automated evaluation based on test results. Passed {} out of {} tests.",
                summary.passed,
                summary.total()
            ),
            issues,
            ai_generated: false,
        }
    }
}

/// `passed / outcomes * 5`, 0 when nothing ran
pub fn score(summary: &ResultSummary) -> f64 {
    summary.pass_rate() * MAX_SCORE
}

// ============================================================================
// Requester Seam
// ============================================================================

/// Backend that reviews a snippet given its test results
#[async_trait]
pub trait FeedbackRequester: Send + Sync {
    async fn request(
        &self,
        source: &str,
        summary: &ResultSummary,
    ) -> Result<Feedback, FeedbackError>;
}

/// Requester used when no backend is configured
#[derive(Debug, Clone, Default)]
pub struct CalculatedFeedback;

#[async_trait]
impl FeedbackRequester for CalculatedFeedback {
    async fn request(
        &self,
        _source: &str,
        summary: &ResultSummary,
    ) -> Result<Feedback, FeedbackError> {
        Ok(Feedback::calculated(summary))
    }
}

// ============================================================================
// Prompt and Reply
// ============================================================================

/// Review prompt embedding the results and the source
pub fn build_prompt(source: &str, summary: &ResultSummary) -> String {
    let outcomes: Vec<String> = summary
        .outcomes
        .iter()
        .map(|o| match &o.message {
            Some(message) => format!(
                "- {} [{}]: {}",
                o.name,
                o.status,
                truncate_with_suffix(message, PROMPT_MESSAGE_LIMIT, "...")
            ),
            None => format!("- {} [{}]", o.name, o.status),
        })
        .collect();

    let leftover = if summary.leftover.trim().is_empty() {
        "(none)".to_string()
    } else {
        truncate_with_suffix(&summary.leftover, PROMPT_LEFTOVER_LIMIT, "\n...")
    };

    format!(
        r#"You are an expert Python developer and code reviewer. Analyze the following test results and code. Give specific, constructive feedback on correctness, code quality and best practices. Return only a JSON object without any additional text or formatting.

**Test Summary**
- Total tests: {total}
- Passed: {passed}
- Failed: {failed}
- Errors: {errors}
- Pass rate: {rate:.1}%
- Timed out: {timed_out}

**Test Outcomes**
{outcomes}

**Other Output**
{leftover}

**Code**
```python
{source}
```

**Return exactly this JSON structure**:
{{
    "language": "{language}",
    "score": {score:.1},
    "scoring_explanation": "Analysis of the results and the code quality. The code passed {passed} out of {total} tests.",
    "issues": [
        {{
            "description": "A specific issue in the code or tests.",
            "severity": "Low" or "Medium" or "High",
            "fix": "How to fix it."
        }}
    ]
}}"#,
        total = summary.total(),
        passed = summary.passed,
        failed = summary.failed,
        errors = summary.errors,
        rate = summary.pass_rate() * 100.0,
        timed_out = summary.timed_out,
        outcomes = if outcomes.is_empty() {
            "(none)".to_string()
        } else {
            outcomes.join("\n")
        },
        leftover = leftover,
        source = truncate_with_suffix(source, PROMPT_SOURCE_LIMIT, "\n# ..."),
        language = FEEDBACK_LANGUAGE,
        score = score(summary),
    )
}

/// Shape of the backend's JSON reply. Everything but the issue list is
/// optional.
#[derive(Debug, Deserialize)]
struct FeedbackReply {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    scoring_explanation: Option<String>,
    #[serde(default)]
    issues: Vec<Issue>,
}

/// Parse a backend reply. The score is replaced by the computed one.
pub fn parse_feedback(text: &str, summary: &ResultSummary) -> Result<Feedback, FeedbackError> {
    let json = extract_json(text)
        .ok_or_else(|| FeedbackError::ParseError("no JSON object in reply".to_string()))?;

    let reply: FeedbackReply =
        serde_json::from_str(json).map_err(|e| FeedbackError::ParseError(e.to_string()))?;

    Ok(Feedback {
        language: reply
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| FEEDBACK_LANGUAGE.to_string()),
        score: score(summary),
        scoring_explanation: reply.scoring_explanation.unwrap_or_default(),
        issues: reply.issues,
        ai_generated: true,
    })
}

/// Strip markdown fences and return the outermost `{...}`
fn extract_json(text: &str) -> Option<&str> {
    let mut body = text.trim();
    body = body.strip_prefix("JSON").unwrap_or(body);

    if let Some((_, rest)) = body.split_once("```json") {
        body = rest.split("```").next().unwrap_or(rest);
    } else if let Some((_, rest)) = body.split_once("```") {
        body = rest.split("```").next().unwrap_or(rest);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::TestOutcome;

    fn outcome(name: &str, status: OutcomeStatus, message: Option<&str>) -> TestOutcome {
        TestOutcome {
            name: name.to_string(),
            status,
            message: message.map(str::to_string),
            lines: None,
        }
    }

    fn summary() -> ResultSummary {
        ResultSummary::from_outcomes(
            vec![
                outcome("t.T.test_a", OutcomeStatus::Passed, None),
                outcome("t.T.test_b", OutcomeStatus::Passed, None),
                outcome("t.T.test_c", OutcomeStatus::Passed, None),
                outcome("t.T.test_d", OutcomeStatus::Failed, Some("AssertionError: 2 != 3")),
            ],
            String::new(),
        )
    }

    #[test]
    fn test_score_from_pass_rate() {
        assert_eq!(score(&summary()), 3.75);
        let empty = ResultSummary::from_outcomes(Vec::new(), String::new());
        assert_eq!(score(&empty), 0.0);
    }

    #[test]
    fn test_calculated_feedback_lists_failures() {
        let feedback = Feedback::calculated(&summary());

        assert!(!feedback.ai_generated);
        assert_eq!(feedback.score, 3.75);
        assert_eq!(feedback.issues.len(), 1);
        assert_eq!(feedback.issues[0].severity, Severity::Medium);
        assert!(feedback.issues[0].description.contains("t.T.test_d failed"));
        assert!(feedback.scoring_explanation.contains("Passed 3 out of 4"));
    }

    #[test]
    fn test_parse_fenced_reply_overrides_score() {
        let reply = "Here you go:\n```json\n{\"language\": \"python3\", \"score\": 5, \
                     \"scoring_explanation\": \"Mostly fine\", \"issues\": [{\"description\": \
                     \"sub is wrong\", \"severity\": \"high\", \"fix\": \"return a - b\"}]}\n```\n";
        let feedback = parse_feedback(reply, &summary()).unwrap();

        assert!(feedback.ai_generated);
        assert_eq!(feedback.score, 3.75);
        assert_eq!(feedback.scoring_explanation, "Mostly fine");
        assert_eq!(feedback.issues[0].severity, Severity::High);
    }

    #[test]
    fn test_parse_bare_object_with_prose() {
        let reply = "JSON {\"issues\": [{\"description\": \"d\", \"severity\": \"Critical\"}]} thanks";
        let feedback = parse_feedback(reply, &summary()).unwrap();

        assert_eq!(feedback.language, "python3");
        assert_eq!(feedback.issues[0].severity, Severity::Medium);
        assert_eq!(feedback.issues[0].fix, "");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_feedback("I cannot help with that.", &summary()),
            Err(FeedbackError::ParseError(_))
        ));
        assert!(parse_feedback("} backwards {", &summary()).is_err());
        assert!(parse_feedback("{\"issues\": \"none\"}", &summary()).is_err());
    }

    #[test]
    fn test_prompt_embeds_results_and_source() {
        let prompt = build_prompt("def sub(a, b):\n    return b - a\n", &summary());

        assert!(prompt.contains("- Total tests: 4"));
        assert!(prompt.contains("- Pass rate: 75.0%"));
        assert!(prompt.contains("t.T.test_d [failed]: AssertionError: 2 != 3"));
        assert!(prompt.contains("return b - a"));
    }

    #[test]
    fn test_severity_serializes_capitalized() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"High\"");
    }

    #[tokio::test]
    async fn test_calculated_requester() {
        let feedback = CalculatedFeedback.request("x = 1", &summary()).await.unwrap();
        assert_eq!(feedback, Feedback::calculated(&summary()));
    }
}
