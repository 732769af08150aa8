mod attempts;
mod clock;
mod controller;
mod errors;
mod gateway;
mod problem_set;
mod proctoring;
mod types;


pub use attempts::{AttemptStore, ProblemAttempt};
pub use clock::{Clock, Tick};
pub use controller::{SessionConfig, SessionController};
pub use errors::{LoadError, RunRejected, SessionError, SubmissionError};
pub use gateway::{LatchGuard, LatchState, RunSlot, SubmissionGateway, SubmissionLatch};
pub use problem_set::{Problem, ProblemSet, TestCase};
pub use proctoring::{
    ArmOutcome, FullscreenDenied, FullscreenPlatform, HeadlessFullscreen, ProctoringMonitor,
    ProctoringState, UnsupportedFullscreen,
};
pub use types::{
    AttemptSummary, FinalSubmissionResult, GradingStatistics, Language, ProblemId, RunOutcome,
    RunResult, SessionId, SessionStatus, SubmitTrigger, TestCaseReport, UnsupportedLanguage,
};
