//! Line grammar for verbose unittest output
//!
//! Every captured line is classified on its own, before any extraction
//! state is involved. The extractor in the parent module only ever looks
//! at [`LineKind`] values.

use super::OutcomeStatus;
use once_cell::sync::Lazy;
use regex::Regex;

/// `test_add (test_snippet.TestAdd.test_add) ... ok`, with an optional
/// subtest description and an optional verdict. Subtest lines are indented:
/// `  test_sub (m.T.test_sub) (i=1) ... FAIL`.
static TEST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(\w+) \(([\w.]+)\)( \(.*?\))?(?:\s+\.\.\.(?:\s+(.*))?)?$")
        .expect("valid test line regex")
});

/// `Adds two numbers ... ok` (a docstring line finishing a pending test)
static TAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s+\.\.\.\s+(\S.*)$").expect("valid tail regex"));

/// `FAIL: test_add (test_snippet.TestAdd.test_add)`
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(FAIL|ERROR): (\w+) \(([\w.]+)\)( \(.*\))?$").expect("valid header regex")
});

/// `Ran 4 tests in 0.002s`
static RAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Ran (\d+) tests? in ([\d.]+)s$").expect("valid summary regex"));

static VERDICT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(OK|FAILED)(?: \(.*\))?$").expect("valid verdict regex"));

static SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(={20,}|-{20,})$").expect("valid separator regex"));

static WARNING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(^|\W)(Deprecation|PendingDeprecation|Resource|Future|User|Syntax|Runtime|Import|Bytes|Unicode)Warning: |^\s+warnings\.warn\(",
    )
    .expect("valid warning regex")
});

/// Verdict text printed after `...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Fail,
    Error,
    /// `skipped 'reason'`, kept verbatim
    Skipped(String),
    ExpectedFailure,
    UnexpectedSuccess,
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Verdict {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text {
            "ok" => Verdict::Ok,
            "FAIL" => Verdict::Fail,
            "ERROR" => Verdict::Error,
            "expected failure" => Verdict::ExpectedFailure,
            "unexpected success" => Verdict::UnexpectedSuccess,
            _ if text == "skipped" || text.starts_with("skipped '") || text.starts_with("skipped \"") => {
                Verdict::Skipped(text.to_string())
            }
            _ => Verdict::Unknown(text.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Verdict::Unknown(_))
    }

    /// Outcome status and message for this verdict. `raw` is the line the
    /// verdict came from, used as the message when the verdict is unknown.
    pub fn resolve(&self, raw: &str) -> (OutcomeStatus, Option<String>) {
        match self {
            Verdict::Ok => (OutcomeStatus::Passed, None),
            Verdict::Fail => (OutcomeStatus::Failed, None),
            Verdict::Error => (OutcomeStatus::Error, None),
            Verdict::Skipped(text) => (OutcomeStatus::Passed, Some(text.clone())),
            Verdict::ExpectedFailure => {
                (OutcomeStatus::Passed, Some("expected failure".to_string()))
            }
            Verdict::UnexpectedSuccess => {
                (OutcomeStatus::Failed, Some("unexpected success".to_string()))
            }
            Verdict::Unknown(_) => (OutcomeStatus::Error, Some(raw.trim().to_string())),
        }
    }
}

/// A per-test result line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLine {
    /// Dotted `module.Class.method`, plus the subtest description if any
    pub name: String,
    /// For a subtest, the dotted name of the test it belongs to
    pub parent: Option<String>,
    /// `None` when the verdict comes on a later line. Text that is not a
    /// verdict (log output written mid-line) comes through as
    /// [`Verdict::Unknown`].
    pub verdict: Option<Verdict>,
}

/// Trailing summary lines
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryLine {
    Ran { count: u32, elapsed_secs: f64 },
    Ok,
    Failed,
    NoTestsRan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noise {
    /// `====` or `----` banner, carrying the character
    Separator(char),
    Blank,
    Warning,
}

/// Classification of one raw output line
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    TestResult(TestLine),
    StatusTail(Verdict),
    FailureHeader { status: OutcomeStatus, name: String },
    Summary(SummaryLine),
    Noise(Noise),
    Unrecognized,
}

/// Join method and path the way unittest reports them. Python 3.11+
/// already ends the path with the method name.
fn dotted_name(method: &str, path: &str, subtest: Option<&str>) -> String {
    let mut name = if path.ends_with(&format!(".{}", method)) {
        path.to_string()
    } else {
        format!("{}.{}", path, method)
    };
    if let Some(subtest) = subtest {
        name.push_str(subtest);
    }
    name
}

/// Classify a single line of runner output
pub fn classify(line: &str) -> LineKind {
    let line = line.trim_end();

    if line.trim().is_empty() {
        return LineKind::Noise(Noise::Blank);
    }
    if SEPARATOR_RE.is_match(line) {
        return LineKind::Noise(Noise::Separator(line.chars().next().unwrap_or('-')));
    }

    if let Some(caps) = TEST_RE.captures(line) {
        let subtest = caps.get(4).map(|m| m.as_str());
        // only subtest lines are indented
        if caps[1].is_empty() || subtest.is_some() {
            let name = dotted_name(&caps[2], &caps[3], subtest);
            let parent = subtest.map(|_| dotted_name(&caps[2], &caps[3], None));
            let verdict = caps
                .get(5)
                .map(|m| m.as_str().trim())
                // a warning printed mid-line pushes the verdict onto a later line
                .filter(|text| !text.is_empty() && !WARNING_RE.is_match(text))
                .map(Verdict::parse);
            return LineKind::TestResult(TestLine {
                name,
                parent,
                verdict,
            });
        }
    }

    if let Some(caps) = HEADER_RE.captures(line) {
        let status = if &caps[1] == "FAIL" {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Error
        };
        let name = dotted_name(&caps[2], &caps[3], caps.get(4).map(|m| m.as_str()));
        return LineKind::FailureHeader { status, name };
    }

    if let Some(caps) = RAN_RE.captures(line) {
        if let (Ok(count), Ok(elapsed_secs)) = (caps[1].parse::<u32>(), caps[2].parse::<f64>()) {
            return LineKind::Summary(SummaryLine::Ran {
                count,
                elapsed_secs,
            });
        }
    }
    if let Some(caps) = VERDICT_RE.captures(line) {
        return LineKind::Summary(if &caps[1] == "OK" {
            SummaryLine::Ok
        } else {
            SummaryLine::Failed
        });
    }
    if line == "NO TESTS RAN" {
        return LineKind::Summary(SummaryLine::NoTestsRan);
    }

    if WARNING_RE.is_match(line) {
        return LineKind::Noise(Noise::Warning);
    }

    if let Some(caps) = TAIL_RE.captures(line) {
        let verdict = Verdict::parse(&caps[2]);
        if verdict.is_known() {
            return LineKind::StatusTail(verdict);
        }
    }
    let bare = Verdict::parse(line);
    if bare.is_known() {
        return LineKind::StatusTail(bare);
    }

    LineKind::Unrecognized
}
