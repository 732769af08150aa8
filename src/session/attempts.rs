use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::session::problem_set::ProblemSet;
use crate::session::types::{AttemptSummary, Language, ProblemId, RunResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemAttempt {
    pub problem_id: ProblemId,
    pub ordinal: usize,
    pub language: Language,
    pub source_code: String,
    /// Most recent run for this problem only; each run replaces it.
    pub last_run_result: Option<RunResult>,
    /// Runs the grader answered. Transport failures are shown but not counted.
    pub runs_recorded: u32,
}

impl ProblemAttempt {
    pub fn attempted(&self) -> bool {
        self.runs_recorded > 0
    }
}

/// Per-problem code and run state. The id space is fixed when the store is built from the
/// loaded problem set, so an unknown id is a caller bug and panics.
#[derive(Debug, Clone)]
pub struct AttemptStore {
    attempts: Vec<ProblemAttempt>,
    index: HashMap<ProblemId, usize>,
}

impl AttemptStore {
    pub fn new(problems: &ProblemSet, language: Language) -> Self {
        let attempts: Vec<_> = problems
            .iter()
            .map(|problem| ProblemAttempt {
                problem_id: problem.id.clone(),
                ordinal: problem.ordinal,
                language,
                source_code: language.boilerplate().to_string(),
                last_run_result: None,
                runs_recorded: 0,
            })
            .collect();
        let index = attempts
            .iter()
            .enumerate()
            .map(|(position, attempt)| (attempt.problem_id.clone(), position))
            .collect();

        Self { attempts, index }
    }

    pub fn contains(&self, problem_id: &ProblemId) -> bool {
        self.index.contains_key(problem_id)
    }

    pub fn attempt(&self, problem_id: &ProblemId) -> &ProblemAttempt {
        &self.attempts[self.position(problem_id)]
    }

    pub fn get_code(&self, problem_id: &ProblemId) -> &str {
        &self.attempt(problem_id).source_code
    }

    pub fn language(&self, problem_id: &ProblemId) -> Language {
        self.attempt(problem_id).language
    }

    pub fn set_code(&mut self, problem_id: &ProblemId, code: impl Into<String>) {
        self.attempt_mut(problem_id).source_code = code.into();
    }

    /// Switches this problem's language and resets its code to the new stub.
    pub fn set_language(&mut self, problem_id: &ProblemId, language: Language) {
        let attempt = self.attempt_mut(problem_id);
        attempt.language = language;
        attempt.source_code = language.boilerplate().to_string();
    }

    pub fn record_run_result(&mut self, problem_id: &ProblemId, result: RunResult) {
        let attempt = self.attempt_mut(problem_id);
        if !result.outcome.is_transport_failure() {
            attempt.runs_recorded += 1;
        }
        attempt.last_run_result = Some(result);
    }

    pub fn attempted_count(&self) -> usize {
        self.attempts.iter().filter(|attempt| attempt.attempted()).count()
    }

    pub fn status_summary(&self, in_flight: &HashSet<ProblemId>) -> Vec<AttemptSummary> {
        self.attempts
            .iter()
            .map(|attempt| AttemptSummary {
                problem_id: attempt.problem_id.clone(),
                ordinal: attempt.ordinal,
                language: attempt.language,
                attempted: attempt.attempted(),
                run_in_flight: in_flight.contains(&attempt.problem_id),
                last_result: attempt.last_run_result.clone(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProblemAttempt> {
        self.attempts.iter()
    }

    fn attempt_mut(&mut self, problem_id: &ProblemId) -> &mut ProblemAttempt {
        let position = self.position(problem_id);
        &mut self.attempts[position]
    }

    fn position(&self, problem_id: &ProblemId) -> usize {
        match self.index.get(problem_id) {
            Some(position) => *position,
            None => panic!("problem {problem_id} is not part of this session"),
        }
    }
}
