//! Wire shapes of the grading backend. Field names follow the backend's snake_case JSON.

mod lenient;
pub mod problem;
pub mod submission;

pub use problem::{ProblemPayload, TestCasePayload};
pub use submission::{
    ErrorBody, FinalSubmitRequest, FinalSubmitResponse, RunProblemRequest, RunProblemResponse,
    StatisticsPayload, TestCaseResultPayload,
};
