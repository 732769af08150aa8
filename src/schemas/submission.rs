use serde::{Deserialize, Serialize};

use super::lenient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProblemRequest {
    pub candidate_id: String,
    pub drive_id: String,
    pub question_id: String,
    pub source_code: String,
    pub language: String,
    pub time_taken: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResultPayload {
    #[serde(default)]
    pub test_case_number: u32,
    #[serde(default, deserialize_with = "lenient::string")]
    pub stdin: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub expected: String,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub stdout: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub stderr: Option<String>,
    #[serde(default, alias = "time_seconds", deserialize_with = "lenient::optional_seconds")]
    pub time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProblemResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub test_cases_passed: u32,
    #[serde(default)]
    pub total_test_cases: u32,
    #[serde(default)]
    pub results: Vec<TestCaseResultPayload>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSubmitRequest {
    pub candidate_id: String,
    pub drive_id: String,
    pub time_taken: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsPayload {
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default, alias = "problems_solved")]
    pub questions_solved: u32,
    #[serde(default)]
    pub score_percentage: f64,
    #[serde(default)]
    pub total_time_taken: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSubmitResponse {
    pub statistics: StatisticsPayload,
}

/// Error body shape used by every backend route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}
