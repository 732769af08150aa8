use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemId(String);

impl ProblemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProblemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifies one exam instance: one candidate sitting one drive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn derive(drive_id: &str, candidate_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(drive_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(candidate_id.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
    C,
}

impl Language {
    pub const ALL: [Language; 5] =
        [Language::Python, Language::JavaScript, Language::Java, Language::Cpp, Language::C];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
        }
    }

    /// Stub an attempt starts from after a language switch.
    pub fn boilerplate(self) -> &'static str {
        match self {
            Self::Python => "# Write your code here\n",
            Self::JavaScript | Self::Java | Self::Cpp | Self::C => "// Write your code here\n",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|language| language.as_str() == normalized)
            .ok_or_else(|| UnsupportedLanguage(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Running,
    Submitting,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// The only edges of the session graph. `Failed -> Submitting` is the retry edge;
    /// `Completed` has no way out.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Submitting)
                | (Self::Submitting, Self::Completed)
                | (Self::Submitting, Self::Failed)
                | (Self::Failed, Self::Submitting)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused the session to leave `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Manual,
    Deadline,
    Termination,
}

impl SubmitTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Deadline => "deadline",
            Self::Termination => "termination",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Accepted,
    WrongAnswer,
    /// Any execution failure reported by the grader: compile errors, limits, crashes.
    RuntimeError { verdict: String },
    /// The run never produced a trustworthy verdict (network, status code, malformed body).
    TransportError { message: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::RuntimeError { .. } => "runtime_error",
            Self::TransportError { .. } => "transport_error",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// The grader never saw this run.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::TransportError { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseReport {
    pub number: u32,
    pub stdin: String,
    pub expected: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub time_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub tests_passed: u32,
    pub total_tests: u32,
    pub cases: Vec<TestCaseReport>,
}

impl RunResult {
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::TransportError { message: message.into() },
            tests_passed: 0,
            total_tests: 0,
            cases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub problem_id: ProblemId,
    pub ordinal: usize,
    pub language: Language,
    pub attempted: bool,
    pub run_in_flight: bool,
    pub last_result: Option<RunResult>,
}

/// Grader-side totals returned by the final submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradingStatistics {
    pub total_questions: u32,
    pub problems_solved: u32,
    pub score_percentage: f64,
    pub total_time_taken: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalSubmissionResult {
    pub total_problems: usize,
    pub problems_attempted: usize,
    pub total_time_taken_seconds: u64,
    pub proctoring_violations: u32,
    pub trigger: SubmitTrigger,
    pub grading: GradingStatistics,
}
