use serde::{Deserialize, Serialize};
use validator::Validate;

use super::lenient;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TestCasePayload {
    #[serde(default, deserialize_with = "lenient::string")]
    pub input: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProblemPayload {
    #[serde(rename = "_id", alias = "id")]
    #[validate(length(min = 1, message = "problem id must not be empty"))]
    pub id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    #[validate(nested)]
    pub test_cases: Vec<TestCasePayload>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
