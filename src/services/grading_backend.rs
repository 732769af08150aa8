use async_trait::async_trait;
use thiserror::Error;

use crate::schemas::{
    FinalSubmitRequest, FinalSubmitResponse, ProblemPayload, RunProblemRequest,
    RunProblemResponse,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed backend response: {0}")]
    Protocol(String),
}

/// Logical contract of the grading backend. Retries, headers and timeouts belong to the
/// implementation; the session only sees these three calls.
#[async_trait]
pub trait GradingBackend: Send + Sync {
    async fn fetch_problems(&self, drive_id: &str) -> Result<Vec<ProblemPayload>, BackendError>;

    async fn run_problem(
        &self,
        request: &RunProblemRequest,
    ) -> Result<RunProblemResponse, BackendError>;

    async fn final_submit(
        &self,
        request: &FinalSubmitRequest,
    ) -> Result<FinalSubmitResponse, BackendError>;
}
