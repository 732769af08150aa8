use thiserror::Error;

use crate::services::BackendError;
use crate::session::types::{ProblemId, SessionStatus};

/// Problem set could not be loaded. Raised before the clock is armed, so retrying costs
/// the candidate no time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("no problems found for drive: {0}")]
    NotFound(String),
    #[error("failed to fetch problems: {0}")]
    Transport(String),
    #[error("malformed problem set: {0}")]
    Protocol(String),
}

impl LoadError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
        }
    }
}

impl From<BackendError> for LoadError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(message) => Self::NotFound(message),
            BackendError::Transport(message) => Self::Transport(message),
            BackendError::Status { .. } => Self::Transport(err.to_string()),
            BackendError::Protocol(message) => Self::Protocol(message),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunRejected {
    #[error("a run is already in flight for problem {0}")]
    AlreadyRunning(ProblemId),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("final submission failed: {0}")]
pub struct SubmissionError(#[from] pub BackendError);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while session is {status}")]
    InvalidState { action: &'static str, status: SessionStatus },
    #[error("unknown problem: {0}")]
    UnknownProblem(ProblemId),
    #[error("session start already in progress")]
    StartInProgress,
    /// Another trigger already holds the submission; its outcome is the session's outcome.
    #[error("final submission already in progress")]
    SubmissionInProgress,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("full screen is required but was denied: {0}")]
    FullscreenRequired(String),
    #[error(transparent)]
    Run(#[from] RunRejected),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}
