use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use validator::Validate;

use crate::schemas::ProblemPayload;
use crate::services::GradingBackend;
use crate::session::errors::LoadError;
use crate::session::types::ProblemId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub id: ProblemId,
    /// 1-based display index.
    pub ordinal: usize,
    pub title: String,
    pub description: String,
    pub constraints: String,
    /// Reference cases shown to the candidate. The backend grades against its own set.
    pub test_cases: Vec<TestCase>,
    pub difficulty: Option<String>,
    pub tags: Vec<String>,
}

/// Ordered problems of one drive. Fetched once per session and never mutated.
#[derive(Debug, Clone)]
pub struct ProblemSet {
    problems: Arc<[Problem]>,
}

impl ProblemSet {
    pub async fn load(backend: &dyn GradingBackend, drive_id: &str) -> Result<Self, LoadError> {
        let payloads = backend.fetch_problems(drive_id).await?;
        Self::from_payloads(drive_id, payloads)
    }

    pub fn from_payloads(drive_id: &str, payloads: Vec<ProblemPayload>) -> Result<Self, LoadError> {
        if payloads.is_empty() {
            return Err(LoadError::NotFound(format!("drive {drive_id} has no coding problems")));
        }

        let mut seen = HashSet::with_capacity(payloads.len());
        let mut problems = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.into_iter().enumerate() {
            payload
                .validate()
                .map_err(|err| LoadError::Protocol(format!("problem #{}: {err}", index + 1)))?;
            if !seen.insert(payload.id.clone()) {
                return Err(LoadError::Protocol(format!("duplicate problem id {}", payload.id)));
            }

            problems.push(Problem {
                id: ProblemId::new(payload.id),
                ordinal: index + 1,
                title: payload.title,
                description: payload.description,
                constraints: payload.constraints,
                test_cases: payload
                    .test_cases
                    .into_iter()
                    .map(|case| TestCase { input: case.input, output: case.output })
                    .collect(),
                difficulty: payload.difficulty,
                tags: payload.tags,
            });
        }

        Ok(Self { problems: problems.into() })
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    pub fn first(&self) -> Option<&Problem> {
        self.problems.first()
    }

    pub fn get(&self, id: &ProblemId) -> Option<&Problem> {
        self.problems.iter().find(|problem| &problem.id == id)
    }

    pub fn by_ordinal(&self, ordinal: usize) -> Option<&Problem> {
        ordinal.checked_sub(1).and_then(|index| self.problems.get(index))
    }

    pub fn contains(&self, id: &ProblemId) -> bool {
        self.get(id).is_some()
    }
}
