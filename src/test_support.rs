use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::schemas::{
    FinalSubmitRequest, FinalSubmitResponse, ProblemPayload, RunProblemRequest,
    RunProblemResponse, StatisticsPayload, TestCasePayload,
};
use crate::services::{BackendError, GradingBackend};
use crate::session::{
    Clock, FullscreenDenied, FullscreenPlatform, HeadlessFullscreen, Language, ProblemSet,
    SessionConfig, SessionController,
};

pub(crate) const TEST_DRIVE_ID: &str = "drive-test";
pub(crate) const TEST_CANDIDATE_ID: &str = "candidate-test";

const ASSESSMENT_VARS: &[&str] = &[
    "ASSESSMENT_STRICT_CONFIG",
    "ASSESSMENT_BACKEND_URL",
    "ASSESSMENT_API_PREFIX",
    "ASSESSMENT_CONNECT_TIMEOUT_SECONDS",
    "ASSESSMENT_REQUEST_TIMEOUT_SECONDS",
    "ASSESSMENT_TIME_LIMIT_SECONDS",
    "ASSESSMENT_DEFAULT_LANGUAGE",
    "ASSESSMENT_REQUIRE_FULLSCREEN",
    "ASSESSMENT_SUBMIT_RETRY_ATTEMPTS",
    "ASSESSMENT_SUBMIT_RETRY_DELAY_SECONDS",
    "ASSESSMENT_LOG_LEVEL",
    "ASSESSMENT_LOG_JSON",
    "ASSESSMENT_PROMETHEUS_ENABLED",
    "ENVIRONMENT",
];

/// Serializes tests that touch process environment.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|err| err.into_inner())
}

pub(crate) fn set_test_env() {
    for key in ASSESSMENT_VARS {
        std::env::remove_var(key);
    }
    std::env::set_var("ASSESSMENT_ENV", "test");
    std::env::set_var("ASSESSMENT_DRIVE_ID", TEST_DRIVE_ID);
    std::env::set_var("ASSESSMENT_CANDIDATE_ID", TEST_CANDIDATE_ID);
}

pub(crate) fn sample_payloads(count: usize) -> Vec<ProblemPayload> {
    (1..=count)
        .map(|index| ProblemPayload {
            id: format!("p{index}"),
            title: format!("Problem {index}"),
            description: format!("Print {index} times the input"),
            constraints: "1 <= n <= 1000".to_string(),
            test_cases: vec![
                TestCasePayload { input: "1".to_string(), output: index.to_string() },
                TestCasePayload { input: "2".to_string(), output: (2 * index).to_string() },
            ],
            difficulty: Some("easy".to_string()),
            tags: vec!["math".to_string()],
        })
        .collect()
}

pub(crate) fn sample_problem_set(count: usize) -> ProblemSet {
    ProblemSet::from_payloads(TEST_DRIVE_ID, sample_payloads(count)).expect("problem set")
}

pub(crate) fn accepted_response(total: u32) -> RunProblemResponse {
    verdict_response("Accepted", total, total)
}

pub(crate) fn verdict_response(verdict: &str, passed: u32, total: u32) -> RunProblemResponse {
    RunProblemResponse {
        success: true,
        result: Some(verdict.to_string()),
        test_cases_passed: passed,
        total_test_cases: total,
        results: Vec::new(),
        error: None,
    }
}

/// Open once released; a dropped gate also lets calls through.
pub(crate) struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    pub(crate) fn release(&self) {
        self.open.send_replace(true);
    }
}

async fn pass_gate(gate: Option<watch::Receiver<bool>>) {
    if let Some(mut gate) = gate {
        let _ = gate.wait_for(|open| *open).await;
    }
}

#[derive(Default)]
struct Script {
    fetch_error: Option<BackendError>,
    run_responses: VecDeque<RunProblemResponse>,
    run_error: Option<BackendError>,
    submit_failures: u32,
    run_gate: Option<watch::Receiver<bool>>,
    submit_gate: Option<watch::Receiver<bool>>,
    run_requests: Vec<RunProblemRequest>,
    submit_requests: Vec<FinalSubmitRequest>,
}

/// In-memory grading backend with call counters and hooks to fail or hold calls.
pub(crate) struct ScriptedBackend {
    problems: Vec<ProblemPayload>,
    script: Mutex<Script>,
    fetch_calls: watch::Sender<usize>,
    run_calls: watch::Sender<usize>,
    submit_calls: watch::Sender<usize>,
}

impl ScriptedBackend {
    pub(crate) fn new(problems: Vec<ProblemPayload>) -> Self {
        Self {
            problems,
            script: Mutex::new(Script::default()),
            fetch_calls: watch::channel(0).0,
            run_calls: watch::channel(0).0,
            submit_calls: watch::channel(0).0,
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub(crate) fn fail_fetch_with(&self, error: BackendError) {
        self.script().fetch_error = Some(error);
    }

    pub(crate) fn clear_fetch_failure(&self) {
        self.script().fetch_error = None;
    }

    pub(crate) fn push_run_response(&self, response: RunProblemResponse) {
        self.script().run_responses.push_back(response);
    }

    pub(crate) fn fail_runs_with(&self, error: BackendError) {
        self.script().run_error = Some(error);
    }

    pub(crate) fn fail_next_submits(&self, count: u32) {
        self.script().submit_failures = count;
    }

    pub(crate) fn hold_runs(&self) -> Gate {
        let (open, gate) = watch::channel(false);
        self.script().run_gate = Some(gate);
        Gate { open }
    }

    pub(crate) fn hold_submits(&self) -> Gate {
        let (open, gate) = watch::channel(false);
        self.script().submit_gate = Some(gate);
        Gate { open }
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        *self.fetch_calls.borrow()
    }

    pub(crate) fn run_calls(&self) -> usize {
        *self.run_calls.borrow()
    }

    pub(crate) fn submit_calls(&self) -> usize {
        *self.submit_calls.borrow()
    }

    /// Resolves once `count` run calls have reached the backend.
    pub(crate) async fn wait_for_runs(&self, count: usize) {
        let mut calls = self.run_calls.subscribe();
        let _ = calls.wait_for(|calls| *calls >= count).await;
    }

    pub(crate) async fn wait_for_submits(&self, count: usize) {
        let mut calls = self.submit_calls.subscribe();
        let _ = calls.wait_for(|calls| *calls >= count).await;
    }

    pub(crate) fn last_run_request(&self) -> Option<RunProblemRequest> {
        self.script().run_requests.last().cloned()
    }

    pub(crate) fn last_submit_request(&self) -> Option<FinalSubmitRequest> {
        self.script().submit_requests.last().cloned()
    }
}

#[async_trait]
impl GradingBackend for ScriptedBackend {
    async fn fetch_problems(&self, drive_id: &str) -> Result<Vec<ProblemPayload>, BackendError> {
        self.fetch_calls.send_modify(|calls| *calls += 1);
        if let Some(error) = self.script().fetch_error.clone() {
            return Err(error);
        }
        if self.problems.is_empty() {
            return Err(BackendError::NotFound(format!("no problems for drive {drive_id}")));
        }
        Ok(self.problems.clone())
    }

    async fn run_problem(
        &self,
        request: &RunProblemRequest,
    ) -> Result<RunProblemResponse, BackendError> {
        let gate = {
            let mut script = self.script();
            script.run_requests.push(request.clone());
            script.run_gate.clone()
        };
        self.run_calls.send_modify(|calls| *calls += 1);
        pass_gate(gate).await;

        let mut script = self.script();
        if let Some(error) = script.run_error.clone() {
            return Err(error);
        }
        Ok(script.run_responses.pop_front().unwrap_or_else(|| accepted_response(3)))
    }

    async fn final_submit(
        &self,
        request: &FinalSubmitRequest,
    ) -> Result<FinalSubmitResponse, BackendError> {
        let gate = {
            let mut script = self.script();
            script.submit_requests.push(request.clone());
            script.submit_gate.clone()
        };
        self.submit_calls.send_modify(|calls| *calls += 1);
        pass_gate(gate).await;

        let mut script = self.script();
        if script.submit_failures > 0 {
            script.submit_failures -= 1;
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(FinalSubmitResponse {
            statistics: StatisticsPayload {
                total_questions: self.problems.len() as u32,
                questions_solved: 0,
                score_percentage: 0.0,
                total_time_taken: request.time_taken,
            },
        })
    }
}

/// Denies every full-screen request but still reports transitions, like a browser that
/// refused the initial request.
#[derive(Default)]
pub(crate) struct DenyingFullscreen {
    engaged: HeadlessFullscreen,
}

impl FullscreenPlatform for DenyingFullscreen {
    fn request_engage(&self) -> Result<(), FullscreenDenied> {
        Err(FullscreenDenied("permission denied by user agent".to_string()))
    }

    fn release(&self) {
        self.engaged.release();
    }

    fn observe_transitions(&self) -> Option<watch::Receiver<bool>> {
        self.engaged.observe_transitions()
    }
}

pub(crate) fn session_config() -> SessionConfig {
    SessionConfig {
        drive_id: TEST_DRIVE_ID.to_string(),
        candidate_id: TEST_CANDIDATE_ID.to_string(),
        default_language: Language::Python,
        require_fullscreen: false,
    }
}

pub(crate) fn controller(
    backend: Arc<ScriptedBackend>,
    platform: Arc<dyn FullscreenPlatform>,
    time_limit_seconds: u64,
) -> SessionController {
    SessionController::new(session_config(), Clock::new(time_limit_seconds), backend, platform)
}
