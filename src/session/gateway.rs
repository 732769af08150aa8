use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::schemas::{FinalSubmitRequest, RunProblemRequest, RunProblemResponse};
use crate::services::{BackendError, GradingBackend};
use crate::session::errors::{RunRejected, SubmissionError};
use crate::session::types::{
    GradingStatistics, Language, ProblemId, RunOutcome, RunResult, TestCaseReport,
};

const LATCH_OPEN: u8 = 0;
const LATCH_HELD: u8 = 1;
const LATCH_DONE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Open,
    Held,
    Done,
}

/// Single-use guard around the final submission. Acquisition is one atomic
/// compare-and-swap, so of two racing triggers exactly one wins.
#[derive(Debug, Default)]
pub struct SubmissionLatch {
    state: AtomicU8,
}

impl SubmissionLatch {
    pub fn try_acquire(self: &Arc<Self>) -> Option<LatchGuard> {
        self.state
            .compare_exchange(LATCH_OPEN, LATCH_HELD, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LatchGuard { latch: Arc::clone(self), committed: false })
    }

    pub fn state(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            LATCH_OPEN => LatchState::Open,
            LATCH_HELD => LatchState::Held,
            _ => LatchState::Done,
        }
    }
}

/// Holding the guard means owning the one permitted submission. Dropping it without
/// [`LatchGuard::commit`] reopens the latch for a retry.
#[derive(Debug)]
pub struct LatchGuard {
    latch: Arc<SubmissionLatch>,
    committed: bool,
}

impl LatchGuard {
    pub fn commit(mut self) {
        self.latch.state.store(LATCH_DONE, Ordering::Release);
        self.committed = true;
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        if !self.committed {
            self.latch.state.store(LATCH_OPEN, Ordering::Release);
        }
    }
}

type InFlight = Arc<Mutex<HashSet<ProblemId>>>;

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashSet<ProblemId>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reservation of the single run slot of one problem. Released on drop.
#[derive(Debug)]
pub struct RunSlot {
    problem_id: ProblemId,
    in_flight: InFlight,
}

impl RunSlot {
    pub fn problem_id(&self) -> &ProblemId {
        &self.problem_id
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.problem_id);
    }
}

/// Session-scoped access to the grading backend with the two client-side guards: one
/// outstanding run per problem, and at most one successful final submission.
#[derive(Clone)]
pub struct SubmissionGateway {
    backend: Arc<dyn GradingBackend>,
    drive_id: String,
    candidate_id: String,
    in_flight: InFlight,
    latch: Arc<SubmissionLatch>,
}

impl SubmissionGateway {
    pub fn new(backend: Arc<dyn GradingBackend>, drive_id: &str, candidate_id: &str) -> Self {
        Self {
            backend,
            drive_id: drive_id.to_string(),
            candidate_id: candidate_id.to_string(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            latch: Arc::new(SubmissionLatch::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GradingBackend> {
        &self.backend
    }

    pub fn reserve_run(&self, problem_id: &ProblemId) -> Result<RunSlot, RunRejected> {
        let mut in_flight = lock_in_flight(&self.in_flight);
        if !in_flight.insert(problem_id.clone()) {
            metrics::counter!("assessment_run_rejected_total").increment(1);
            return Err(RunRejected::AlreadyRunning(problem_id.clone()));
        }
        Ok(RunSlot { problem_id: problem_id.clone(), in_flight: Arc::clone(&self.in_flight) })
    }

    pub async fn run_problem(
        &self,
        problem_id: &ProblemId,
        source_code: String,
        language: Language,
        elapsed_seconds: u64,
    ) -> Result<RunResult, RunRejected> {
        let slot = self.reserve_run(problem_id)?;
        Ok(self.run_reserved(slot, source_code, language, elapsed_seconds).await)
    }

    /// Never fails: transport and protocol problems come back as a degraded result.
    pub async fn run_reserved(
        &self,
        slot: RunSlot,
        source_code: String,
        language: Language,
        elapsed_seconds: u64,
    ) -> RunResult {
        let request = RunProblemRequest {
            candidate_id: self.candidate_id.clone(),
            drive_id: self.drive_id.clone(),
            question_id: slot.problem_id().to_string(),
            source_code,
            language: language.as_str().to_string(),
            time_taken: elapsed_seconds,
        };

        let timer = Instant::now();
        let result = match self.backend.run_problem(&request).await {
            Ok(response) => decode_run_response(response),
            Err(err) => {
                tracing::warn!(
                    problem_id = %slot.problem_id(),
                    error = %err,
                    "Run did not reach the grader"
                );
                RunResult::transport_failure(err.to_string())
            }
        };
        metrics::histogram!("assessment_run_duration_seconds")
            .record(timer.elapsed().as_secs_f64());
        metrics::counter!("assessment_runs_total", "outcome" => result.outcome.label())
            .increment(1);

        drop(slot);
        result
    }

    pub fn in_flight(&self) -> HashSet<ProblemId> {
        lock_in_flight(&self.in_flight).clone()
    }

    pub fn is_running(&self, problem_id: &ProblemId) -> bool {
        lock_in_flight(&self.in_flight).contains(problem_id)
    }

    pub fn try_acquire_submission(&self) -> Option<LatchGuard> {
        self.latch.try_acquire()
    }

    pub fn submission_latch(&self) -> LatchState {
        self.latch.state()
    }

    /// Consumes the latch guard: committed on success, released on failure.
    pub async fn final_submit(
        &self,
        guard: LatchGuard,
        elapsed_seconds: u64,
    ) -> Result<GradingStatistics, SubmissionError> {
        let request = FinalSubmitRequest {
            candidate_id: self.candidate_id.clone(),
            drive_id: self.drive_id.clone(),
            time_taken: elapsed_seconds,
        };

        match self.backend.final_submit(&request).await {
            Ok(response) => {
                guard.commit();
                let statistics = response.statistics;
                Ok(GradingStatistics {
                    total_questions: statistics.total_questions,
                    problems_solved: statistics.questions_solved,
                    score_percentage: statistics.score_percentage,
                    total_time_taken: statistics.total_time_taken,
                })
            }
            Err(err) => {
                drop(guard);
                Err(SubmissionError(err))
            }
        }
    }
}

/// The one place backend run payloads are interpreted.
pub(crate) fn decode_run_response(response: RunProblemResponse) -> RunResult {
    if response.test_cases_passed > response.total_test_cases {
        return RunResult::transport_failure(
            BackendError::Protocol(format!(
                "{} of {} test cases passed",
                response.test_cases_passed, response.total_test_cases
            ))
            .to_string(),
        );
    }

    let outcome = if !response.success {
        RunOutcome::RuntimeError {
            verdict: response
                .error
                .or(response.result)
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| "Error".to_string()),
        }
    } else {
        match response.result.as_deref().map(str::trim) {
            Some("Accepted") => RunOutcome::Accepted,
            Some("Wrong Answer") => RunOutcome::WrongAnswer,
            Some(verdict) if !verdict.is_empty() => {
                RunOutcome::RuntimeError { verdict: verdict.to_string() }
            }
            _ => {
                return RunResult::transport_failure(
                    BackendError::Protocol("run response has no verdict".to_string())
                        .to_string(),
                )
            }
        }
    };

    let cases = response
        .results
        .into_iter()
        .enumerate()
        .map(|(index, case)| TestCaseReport {
            number: if case.test_case_number == 0 {
                index as u32 + 1
            } else {
                case.test_case_number
            },
            stdin: case.stdin,
            expected: case.expected,
            stdout: case.stdout,
            stderr: case.stderr.filter(|text| !text.is_empty()),
            time_seconds: case.time,
        })
        .collect();

    RunResult {
        outcome,
        tests_passed: response.test_cases_passed,
        total_tests: response.total_test_cases,
        cases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, ScriptedBackend};
    use serde_json::json;

    fn response(value: serde_json::Value) -> RunProblemResponse {
        serde_json::from_value(value).expect("run response")
    }

    #[test]
    fn decodes_accepted_run() {
        let result = decode_run_response(response(json!({
            "success": true,
            "result": "Accepted",
            "test_cases_passed": 2,
            "total_test_cases": 2,
            "results": [
                {"test_case_number": 1, "stdin": "1", "expected": "1", "stdout": "1", "time": "0.01"},
                {"stdin": "2", "expected": "2", "stdout": "2", "stderr": ""}
            ]
        })));

        assert_eq!(result.outcome, RunOutcome::Accepted);
        assert_eq!(result.tests_passed, 2);
        assert_eq!(result.cases[1].number, 2);
        assert_eq!(result.cases[1].stderr, None);
        assert_eq!(result.cases[0].time_seconds, Some(0.01));
    }

    #[test]
    fn execution_verdicts_collapse_into_runtime_error() {
        for verdict in ["Compilation Error", "Time Limit Exceeded", "Runtime Error", "Error"] {
            let result = decode_run_response(response(json!({
                "success": true,
                "result": verdict,
                "test_cases_passed": 0,
                "total_test_cases": 3
            })));
            assert_eq!(result.outcome, RunOutcome::RuntimeError { verdict: verdict.to_string() });
        }
    }

    #[test]
    fn unsuccessful_run_keeps_backend_error_text() {
        let result = decode_run_response(response(json!({
            "success": false,
            "error": "judge0 timed out",
            "test_cases_passed": 0,
            "total_test_cases": 3
        })));
        assert_eq!(
            result.outcome,
            RunOutcome::RuntimeError { verdict: "judge0 timed out".to_string() }
        );
    }

    #[test]
    fn inconsistent_counts_are_a_protocol_failure() {
        let result = decode_run_response(response(json!({
            "success": true,
            "result": "Accepted",
            "test_cases_passed": 4,
            "total_test_cases": 3
        })));
        assert_eq!(result.outcome.label(), "transport_error");
    }

    #[test]
    fn missing_verdict_is_a_protocol_failure() {
        let result = decode_run_response(response(json!({"success": true})));
        assert_eq!(result.outcome.label(), "transport_error");
    }

    #[test]
    fn latch_admits_one_holder_and_reopens_on_drop() {
        let latch = Arc::new(SubmissionLatch::default());

        let guard = latch.try_acquire().expect("first acquire");
        assert!(latch.try_acquire().is_none());
        assert_eq!(latch.state(), LatchState::Held);

        drop(guard);
        assert_eq!(latch.state(), LatchState::Open);

        latch.try_acquire().expect("reacquire").commit();
        assert_eq!(latch.state(), LatchState::Done);
        assert!(latch.try_acquire().is_none());
    }

    #[tokio::test]
    async fn second_run_for_same_problem_is_rejected_locally() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(2)));
        let gate = backend.hold_runs();
        let gateway = SubmissionGateway::new(backend.clone(), "drive-1", "cand-1");
        let p1 = ProblemId::from("p1");

        let first = {
            let gateway = gateway.clone();
            let p1 = p1.clone();
            tokio::spawn(async move {
                gateway.run_problem(&p1, "print(1)".to_string(), Language::Python, 5).await
            })
        };
        backend.wait_for_runs(1).await;

        let second = gateway.run_problem(&p1, "print(2)".to_string(), Language::Python, 6).await;
        assert_eq!(second, Err(RunRejected::AlreadyRunning(p1.clone())));

        let other = gateway.reserve_run(&ProblemId::from("p2"));
        assert!(other.is_ok());

        gate.release();
        let first = first.await.expect("join").expect("first run");
        assert!(first.outcome.is_accepted());
        assert_eq!(backend.run_calls(), 1);
        assert!(!gateway.is_running(&p1));
    }

    #[tokio::test]
    async fn transport_failure_becomes_degraded_result() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(1)));
        backend.fail_runs_with(BackendError::Transport("connection reset".to_string()));
        let gateway = SubmissionGateway::new(backend.clone(), "drive-1", "cand-1");

        let result = gateway
            .run_problem(&ProblemId::from("p1"), "x".to_string(), Language::C, 1)
            .await
            .expect("not rejected");

        assert!(matches!(result.outcome, RunOutcome::TransportError { ref message }
            if message.contains("connection reset")));
        assert!(gateway.in_flight().is_empty());
    }

    #[tokio::test]
    async fn failed_final_submit_releases_latch() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(1)));
        backend.fail_next_submits(1);
        let gateway = SubmissionGateway::new(backend.clone(), "drive-1", "cand-1");

        let guard = gateway.try_acquire_submission().expect("latch");
        assert!(gateway.final_submit(guard, 10).await.is_err());
        assert_eq!(gateway.submission_latch(), LatchState::Open);

        let guard = gateway.try_acquire_submission().expect("latch again");
        let stats = gateway.final_submit(guard, 12).await.expect("submit");
        assert_eq!(stats.total_questions, 1);
        assert_eq!(gateway.submission_latch(), LatchState::Done);
        assert_eq!(backend.submit_calls(), 2);
        assert_eq!(backend.last_submit_request().map(|req| req.time_taken), Some(12));
    }
}
