//! Result normalizer
//!
//! Turns the raw output of a unittest run into an ordered list of test
//! outcomes plus aggregate counts. Parsing never fails: anything that cannot
//! be attributed to a test is kept verbatim as leftover text.

pub mod line;

use crate::runner::RawExecutionResult;
use line::{classify, LineKind, Noise, SummaryLine, Verdict};
use serde::{Deserialize, Serialize};

/// Name of the synthetic outcome added when the run hit its deadline
pub const TIMEOUT_OUTCOME_NAME: &str = "sandbox.timeout";

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Status of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Error,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Passed => write!(f, "passed"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Error => write!(f, "error"),
        }
    }
}

/// Output stream a line was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// 1-based, inclusive line range within one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub stream: Stream,
    pub start: usize,
    pub end: usize,
}

/// Result of one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Where the outcome was reported. `None` only for synthetic outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineSpan>,
}

/// Structured result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub outcomes: Vec<TestOutcome>,
    /// Output not attributable to any test or summary line
    pub leftover: String,
    /// Count from the `Ran N tests` line, if one was printed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_ran: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
    pub timed_out: bool,
    pub exit_code: Option<i64>,
}

impl ResultSummary {
    /// Build a summary, deriving the counts from `outcomes`
    pub fn from_outcomes(outcomes: Vec<TestOutcome>, leftover: String) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();

        Self {
            passed: count(OutcomeStatus::Passed),
            failed: count(OutcomeStatus::Failed),
            errors: count(OutcomeStatus::Error),
            outcomes,
            leftover,
            tests_ran: None,
            elapsed_secs: None,
            timed_out: false,
            exit_code: None,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// At least one test ran and none failed or errored
    pub fn all_passed(&self) -> bool {
        self.total() > 0 && self.failed == 0 && self.errors == 0
    }

    /// Fraction of outcomes that passed, 0.0 when nothing ran
    pub fn pass_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.passed as f64 / self.outcomes.len() as f64
        }
    }
}

/// Normalize a raw run into a summary. Pure: the same input always yields
/// the same summary.
pub fn normalize(raw: &RawExecutionResult) -> ResultSummary {
    let mut extractor = Extractor::default();
    extractor.scan(Stream::Stdout, &raw.stdout);
    extractor.scan(Stream::Stderr, &raw.stderr);

    if raw.timed_out {
        extractor.outcomes.push(TestOutcome {
            name: TIMEOUT_OUTCOME_NAME.to_string(),
            status: OutcomeStatus::Error,
            message: Some(format!(
                "execution exceeded the {}s time limit and was terminated",
                raw.timeout.as_secs_f64()
            )),
            lines: None,
        });
    }

    let mut summary =
        ResultSummary::from_outcomes(extractor.outcomes, extractor.leftover.join("\n"));
    summary.tests_ran = extractor.tests_ran;
    summary.elapsed_secs = extractor.elapsed_secs;
    summary.timed_out = raw.timed_out;
    summary.exit_code = raw.exit_code;
    summary
}

/// A test line waiting for its verdict
struct Pending {
    name: String,
    raw: String,
    span: LineSpan,
}

/// An open `FAIL:` / `ERROR:` detail block
struct Block {
    status: OutcomeStatus,
    name: String,
    span: LineSpan,
    body: Vec<String>,
}

#[derive(Default)]
struct Extractor {
    outcomes: Vec<TestOutcome>,
    leftover: Vec<String>,
    pending: Option<Pending>,
    block: Option<Block>,
    tests_ran: Option<u32>,
    elapsed_secs: Option<f64>,
}

impl Extractor {
    fn scan(&mut self, stream: Stream, text: &str) {
        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let kind = classify(raw);

            if self.block.is_some() && self.absorb(&kind, raw) {
                continue;
            }

            match kind {
                LineKind::TestResult(test) => {
                    // subtest results stand in for the test they belong to
                    let parent_pending = matches!(
                        (&self.pending, &test.parent),
                        (Some(pending), Some(parent)) if &pending.name == parent
                    );
                    if parent_pending {
                        self.pending = None;
                    } else {
                        self.flush_pending();
                    }

                    let span = LineSpan {
                        stream,
                        start: lineno,
                        end: lineno,
                    };
                    match test.verdict {
                        Some(verdict) if verdict.is_known() => {
                            self.push(test.name, &verdict, raw, span)
                        }
                        // no verdict yet, or log output ahead of it
                        _ => {
                            self.pending = Some(Pending {
                                name: test.name,
                                raw: raw.trim_end().to_string(),
                                span,
                            })
                        }
                    }
                }
                LineKind::StatusTail(verdict) => match self.pending.take() {
                    Some(pending) => {
                        let span = LineSpan {
                            end: lineno,
                            ..pending.span
                        };
                        self.push(pending.name, &verdict, raw, span);
                    }
                    None => self.leftover.push(raw.to_string()),
                },
                LineKind::FailureHeader { status, name } => {
                    self.flush_pending();
                    self.block = Some(Block {
                        status,
                        name,
                        span: LineSpan {
                            stream,
                            start: lineno,
                            end: lineno,
                        },
                        body: Vec::new(),
                    });
                }
                LineKind::Summary(summary) => {
                    self.flush_pending();
                    if let SummaryLine::Ran {
                        count,
                        elapsed_secs,
                    } = summary
                    {
                        self.tests_ran = Some(count);
                        self.elapsed_secs = Some(elapsed_secs);
                    }
                }
                LineKind::Noise(_) => {}
                LineKind::Unrecognized => self.leftover.push(raw.to_string()),
            }
        }

        self.close_block();
        self.flush_pending();
    }

    /// Feed a line to the open detail block. Returns false when the line
    /// ends the block and still needs regular handling.
    fn absorb(&mut self, kind: &LineKind, raw: &str) -> bool {
        let Some(block) = self.block.as_mut() else {
            return false;
        };

        match kind {
            LineKind::Noise(Noise::Separator('=')) | LineKind::Summary(_) => {
                self.close_block();
                false
            }
            LineKind::FailureHeader { .. } => {
                self.close_block();
                false
            }
            // the divider right under the header
            LineKind::Noise(Noise::Separator(_)) if block.body.is_empty() => true,
            // the divider above `Ran N tests`
            LineKind::Noise(Noise::Separator(_)) => {
                self.close_block();
                true
            }
            LineKind::Noise(Noise::Warning) => true,
            _ => {
                block.body.push(raw.trim_end().to_string());
                true
            }
        }
    }

    fn close_block(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        let message = exception_text(&block.body);

        let matches = |o: &TestOutcome| o.name == block.name && o.status != OutcomeStatus::Passed;

        // blocks come in the order the failures were reported
        if let Some(outcome) = self
            .outcomes
            .iter_mut()
            .find(|o| matches(o) && o.message.is_none())
        {
            outcome.message = message;
            return;
        }

        if !self.outcomes.iter().any(matches) {
            self.outcomes.push(TestOutcome {
                name: block.name,
                status: block.status,
                message,
                lines: Some(block.span),
            });
        }
    }

    /// A test line whose verdict never arrived counts as an error
    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.outcomes.push(TestOutcome {
                name: pending.name,
                status: OutcomeStatus::Error,
                message: Some(pending.raw),
                lines: Some(pending.span),
            });
        }
    }

    fn push(&mut self, name: String, verdict: &Verdict, raw: &str, span: LineSpan) {
        let (status, message) = verdict.resolve(raw);
        self.outcomes.push(TestOutcome {
            name,
            status,
            message,
            lines: Some(span),
        });
    }
}

/// The exception text of a detail block: everything after the frames of
/// the last traceback, verbatim.
fn exception_text(body: &[String]) -> Option<String> {
    let start = body
        .iter()
        .rposition(|line| line.starts_with(TRACEBACK_HEADER))
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let tail = &body[start..];

    let text_start = tail
        .iter()
        .position(|line| !line.is_empty() && !line.starts_with(char::is_whitespace))
        .unwrap_or(tail.len());

    let text = tail[text_start..].join("\n");
    let text = text.trim_end();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
