use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::time::{format_countdown, is_low_time, now_utc};
use crate::services::{BackendError, GradingBackend};
use crate::session::attempts::AttemptStore;
use crate::session::clock::{Clock, Tick};
use crate::session::errors::{LoadError, SessionError, SubmissionError};
use crate::session::gateway::{LatchState, SubmissionGateway};
use crate::session::problem_set::{Problem, ProblemSet};
use crate::session::proctoring::{
    ArmOutcome, FullscreenPlatform, ProctoringMonitor, ProctoringState,
};
use crate::session::types::{
    AttemptSummary, FinalSubmissionResult, Language, ProblemId, RunResult, SessionId,
    SessionStatus, SubmitTrigger,
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub drive_id: String,
    pub candidate_id: String,
    pub default_language: Language,
    /// Refuse to start when the platform denies full screen.
    pub require_fullscreen: bool,
}

struct SessionState {
    status: SessionStatus,
    starting: bool,
    problems: Option<ProblemSet>,
    attempts: Option<AttemptStore>,
    selected: Option<ProblemId>,
    clock: Clock,
    proctoring: ProctoringMonitor,
    trigger: Option<SubmitTrigger>,
    time_taken_seconds: Option<u64>,
    final_result: Option<FinalSubmissionResult>,
    last_error: Option<String>,
}

struct Inner {
    session_id: SessionId,
    config: SessionConfig,
    gateway: SubmissionGateway,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut SessionState, next: SessionStatus) {
        debug_assert!(
            state.status.can_transition_to(next),
            "illegal transition {} -> {next}",
            state.status
        );
        tracing::info!(
            session_id = %self.session_id,
            from = %state.status,
            to = %next,
            "Session status changed"
        );
        state.status = next;
        self.status_tx.send_replace(next);
    }
}

/// Resets the `starting` flag however `start` exits, including a dropped future.
struct StartAttempt<'a> {
    inner: &'a Inner,
}

impl Drop for StartAttempt<'_> {
    fn drop(&mut self) {
        self.inner.lock().starting = false;
    }
}

/// Orchestrates one candidate's exam. Cheap to clone; every clone drives the same session.
///
/// State lives behind a synchronous mutex that is never held across an await. The two
/// suspending operations, `run` and `submit`, hand their backend call to a spawned task
/// once their guard is acquired so that a dropped caller cannot strand the guard.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        clock: Clock,
        backend: Arc<dyn GradingBackend>,
        platform: Arc<dyn FullscreenPlatform>,
    ) -> Self {
        let session_id = SessionId::derive(&config.drive_id, &config.candidate_id);
        let gateway = SubmissionGateway::new(backend, &config.drive_id, &config.candidate_id);
        let (status_tx, _) = watch::channel(SessionStatus::NotStarted);

        let state = SessionState {
            status: SessionStatus::NotStarted,
            starting: false,
            problems: None,
            attempts: None,
            selected: None,
            clock,
            proctoring: ProctoringMonitor::new(platform),
            trigger: None,
            time_taken_seconds: None,
            final_result: None,
            last_error: None,
        };

        Self {
            inner: Arc::new(Inner {
                session_id,
                config,
                gateway,
                state: Mutex::new(state),
                status_tx,
            }),
        }
    }

    /// Loads the problems, engages proctoring and arms the clock, in that order. Any
    /// failure leaves the session in `NotStarted` with the clock untouched.
    pub async fn start(&self) -> Result<SessionStatus, SessionError> {
        {
            let mut state = self.inner.lock();
            if state.status != SessionStatus::NotStarted {
                return Err(SessionError::InvalidState { action: "start", status: state.status });
            }
            if state.starting {
                return Err(SessionError::StartInProgress);
            }
            state.starting = true;
        }
        let _attempt = StartAttempt { inner: &self.inner };

        let drive_id = &self.inner.config.drive_id;
        tracing::info!(session_id = %self.inner.session_id, drive_id = %drive_id, "Loading problem set");
        let problems =
            match ProblemSet::load(self.inner.gateway.backend().as_ref(), drive_id).await {
                Ok(problems) => problems,
                Err(err) => return Err(self.load_failed(err)),
            };

        let mut state = self.inner.lock();
        match state.proctoring.arm() {
            ArmOutcome::Engaged => {}
            ArmOutcome::Denied(denied) if self.inner.config.require_fullscreen => {
                tracing::warn!(
                    session_id = %self.inner.session_id,
                    reason = %denied.0,
                    "Full screen denied; refusing to start"
                );
                state.last_error = Some(denied.to_string());
                return Err(SessionError::FullscreenRequired(denied.0));
            }
            ArmOutcome::Denied(denied) => {
                tracing::warn!(
                    session_id = %self.inner.session_id,
                    reason = %denied.0,
                    "Full screen denied; continuing without proctoring"
                );
            }
        }

        let language = self.inner.config.default_language;
        state.attempts = Some(AttemptStore::new(&problems, language));
        state.selected = problems.first().map(|problem| problem.id.clone());
        let deadline = state.clock.arm(now_utc());
        tracing::info!(
            session_id = %self.inner.session_id,
            problems = problems.len(),
            deadline = ?deadline,
            "Session started"
        );
        state.problems = Some(problems);
        state.last_error = None;
        self.inner.transition(&mut state, SessionStatus::Running);
        metrics::counter!("assessment_sessions_started_total").increment(1);

        Ok(state.status)
    }

    fn load_failed(&self, err: LoadError) -> SessionError {
        tracing::warn!(
            session_id = %self.inner.session_id,
            error = %err,
            "Problem set could not be loaded"
        );
        metrics::counter!("assessment_problem_load_failures_total", "reason" => err.reason())
            .increment(1);
        self.inner.lock().last_error = Some(err.to_string());
        SessionError::Load(err)
    }

    pub fn select_problem(&self, problem_id: &ProblemId) -> Result<(), SessionError> {
        let mut state = self.running_state("select a problem")?;
        ensure_known(&state, problem_id)?;
        state.selected = Some(problem_id.clone());
        Ok(())
    }

    pub fn edit_code(&self, problem_id: &ProblemId, code: impl Into<String>) -> Result<(), SessionError> {
        let mut state = self.running_state("edit code")?;
        ensure_known(&state, problem_id)?;
        if let Some(attempts) = state.attempts.as_mut() {
            attempts.set_code(problem_id, code);
        }
        Ok(())
    }

    /// Resets this problem's code to the language stub.
    pub fn select_language(&self, problem_id: &ProblemId, language: Language) -> Result<(), SessionError> {
        let mut state = self.running_state("change language")?;
        ensure_known(&state, problem_id)?;
        if let Some(attempts) = state.attempts.as_mut() {
            attempts.set_language(problem_id, language);
        }
        Ok(())
    }

    /// Runs the problem's current code. A second run for the same problem while one is
    /// pending is rejected before any network traffic. The result is recorded against the
    /// problem even if the session has moved on by the time it arrives.
    pub async fn run(&self, problem_id: &ProblemId) -> Result<RunResult, SessionError> {
        let (slot, code, language, elapsed) = {
            let state = self.running_state("run code")?;
            ensure_known(&state, problem_id)?;
            let Some(attempts) = state.attempts.as_ref() else {
                return Err(SessionError::UnknownProblem(problem_id.clone()));
            };
            let slot = self.inner.gateway.reserve_run(problem_id)?;
            (
                slot,
                attempts.get_code(problem_id).to_string(),
                attempts.language(problem_id),
                state.clock.elapsed_seconds(),
            )
        };

        tracing::info!(
            session_id = %self.inner.session_id,
            problem_id = %problem_id,
            language = %language,
            "Running code"
        );

        let inner = Arc::clone(&self.inner);
        let problem_id = problem_id.clone();
        let task = tokio::spawn(async move {
            let result = inner.gateway.run_reserved(slot, code, language, elapsed).await;
            if let Some(attempts) = inner.lock().attempts.as_mut() {
                attempts.record_run_result(&problem_id, result.clone());
            }
            tracing::info!(
                session_id = %inner.session_id,
                problem_id = %problem_id,
                outcome = result.outcome.label(),
                passed = result.tests_passed,
                total = result.total_tests,
                "Run finished"
            );
            result
        });

        Ok(task
            .await
            .unwrap_or_else(|err| RunResult::transport_failure(format!("run task failed: {err}"))))
    }

    pub async fn submit(&self) -> Result<FinalSubmissionResult, SessionError> {
        self.submit_with(SubmitTrigger::Manual).await
    }

    /// Funnels every submission trigger through the single latch. Allowed from `Running`
    /// and, as a retry, from `Failed`; the recorded time taken never changes on retry.
    pub async fn submit_with(
        &self,
        trigger: SubmitTrigger,
    ) -> Result<FinalSubmissionResult, SessionError> {
        let (guard, time_taken) = {
            let mut state = self.inner.lock();
            match state.status {
                SessionStatus::Running | SessionStatus::Failed => {}
                SessionStatus::Submitting => return Err(SessionError::SubmissionInProgress),
                status => return Err(SessionError::InvalidState { action: "submit", status }),
            }
            let Some(guard) = self.inner.gateway.try_acquire_submission() else {
                return Err(SessionError::SubmissionInProgress);
            };

            if state.status == SessionStatus::Running {
                state.clock.disarm();
                state.proctoring.disarm();
                state.time_taken_seconds = Some(state.clock.elapsed_seconds());
                state.trigger = Some(trigger);
            }
            let time_taken = state.time_taken_seconds.unwrap_or_default();
            self.inner.transition(&mut state, SessionStatus::Submitting);
            (guard, time_taken)
        };

        tracing::info!(
            session_id = %self.inner.session_id,
            trigger = trigger.as_str(),
            time_taken,
            "Submitting assessment"
        );

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.gateway.final_submit(guard, time_taken).await;
            let mut state = inner.lock();
            let first_trigger = state.trigger.unwrap_or(trigger);
            match outcome {
                Ok(grading) => {
                    let result = FinalSubmissionResult {
                        total_problems: state.problems.as_ref().map_or(0, ProblemSet::len),
                        problems_attempted: state
                            .attempts
                            .as_ref()
                            .map_or(0, AttemptStore::attempted_count),
                        total_time_taken_seconds: time_taken,
                        proctoring_violations: state.proctoring.violations(),
                        trigger: first_trigger,
                        grading,
                    };
                    state.final_result = Some(result.clone());
                    state.last_error = None;
                    inner.transition(&mut state, SessionStatus::Completed);
                    metrics::counter!(
                        "assessment_final_submit_total",
                        "status" => "completed",
                        "trigger" => first_trigger.as_str()
                    )
                    .increment(1);
                    Ok(result)
                }
                Err(err) => {
                    tracing::error!(
                        session_id = %inner.session_id,
                        error = %err,
                        "Final submission failed"
                    );
                    state.last_error = Some(err.to_string());
                    inner.transition(&mut state, SessionStatus::Failed);
                    metrics::counter!(
                        "assessment_final_submit_total",
                        "status" => "failed",
                        "trigger" => first_trigger.as_str()
                    )
                    .increment(1);
                    Err(SessionError::Submission(err))
                }
            }
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(SessionError::Submission(SubmissionError(BackendError::Transport(
                format!("submit task failed: {err}"),
            )))),
        }
    }

    /// Advances the clock by one second. Expiry submits with the deadline trigger before
    /// returning.
    pub async fn tick(&self) -> Tick {
        let tick = self.inner.lock().clock.tick();
        if tick == Tick::Expired {
            tracing::info!(session_id = %self.inner.session_id, "Time limit reached");
            match self.submit_with(SubmitTrigger::Deadline).await {
                Ok(_) | Err(SessionError::SubmissionInProgress) => {}
                Err(err) => tracing::warn!(
                    session_id = %self.inner.session_id,
                    error = %err,
                    "Deadline submission did not complete"
                ),
            }
        }
        tick
    }

    /// Feeds a platform full-screen transition into the monitor. Ignored outside `Running`.
    pub fn fullscreen_changed(&self, engaged: bool) -> ProctoringState {
        let mut state = self.inner.lock();
        if state.status != SessionStatus::Running {
            return state.proctoring.state();
        }

        if engaged {
            if state.proctoring.on_enter() {
                tracing::info!(session_id = %self.inner.session_id, "Full screen restored");
            }
        } else if state.proctoring.on_exit() {
            metrics::counter!("assessment_proctoring_violations_total").increment(1);
            tracing::warn!(
                session_id = %self.inner.session_id,
                violations = state.proctoring.violations(),
                remaining_seconds = state.clock.remaining_seconds(),
                "Candidate left full screen"
            );
        }
        state.proctoring.state()
    }

    /// Drives the clock at one tick per second until the session leaves `Running`.
    pub fn spawn_clock(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                match controller.tick().await {
                    Tick::Expired => break,
                    Tick::Idle
                        if !matches!(
                            controller.status(),
                            SessionStatus::NotStarted | SessionStatus::Running
                        ) =>
                    {
                        break
                    }
                    _ => {}
                }
            }
        })
    }

    /// `None` when the platform cannot report transitions.
    pub fn spawn_proctoring_observer(&self) -> Option<JoinHandle<()>> {
        let mut transitions = self.platform().observe_transitions()?;
        let controller = self.clone();
        Some(tokio::spawn(async move {
            while transitions.changed().await.is_ok() {
                let engaged = *transitions.borrow_and_update();
                controller.fullscreen_changed(engaged);
                if controller.status().is_terminal() {
                    break;
                }
            }
        }))
    }

    fn running_state(&self, action: &'static str) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        let state = self.inner.lock();
        if state.status != SessionStatus::Running {
            return Err(SessionError::InvalidState { action, status: state.status });
        }
        Ok(state)
    }

    fn platform(&self) -> Arc<dyn FullscreenPlatform> {
        Arc::clone(self.inner.lock().proctoring.platform())
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn time_remaining_seconds(&self) -> u64 {
        self.inner.lock().clock.remaining_seconds()
    }

    pub fn countdown(&self) -> String {
        format_countdown(self.time_remaining_seconds())
    }

    pub fn low_time(&self) -> bool {
        let state = self.inner.lock();
        state.status == SessionStatus::Running && is_low_time(state.clock.remaining_seconds())
    }

    pub fn deadline(&self) -> Option<OffsetDateTime> {
        self.inner.lock().clock.deadline()
    }

    pub fn proctoring_violation_visible(&self) -> bool {
        let state = self.inner.lock();
        state.status == SessionStatus::Running && state.proctoring.violation_visible()
    }

    pub fn proctoring_violations(&self) -> u32 {
        self.inner.lock().proctoring.violations()
    }

    pub fn attempt_summaries(&self) -> Vec<AttemptSummary> {
        let in_flight = self.inner.gateway.in_flight();
        self.inner
            .lock()
            .attempts
            .as_ref()
            .map(|attempts| attempts.status_summary(&in_flight))
            .unwrap_or_default()
    }

    pub fn problems(&self) -> Option<ProblemSet> {
        self.inner.lock().problems.clone()
    }

    pub fn selected_problem(&self) -> Option<Problem> {
        let state = self.inner.lock();
        let selected = state.selected.as_ref()?;
        state.problems.as_ref()?.get(selected).cloned()
    }

    pub fn code(&self, problem_id: &ProblemId) -> Option<String> {
        let state = self.inner.lock();
        let attempts = state.attempts.as_ref()?;
        attempts
            .contains(problem_id)
            .then(|| attempts.get_code(problem_id).to_string())
    }

    pub fn language(&self, problem_id: &ProblemId) -> Option<Language> {
        let state = self.inner.lock();
        let attempts = state.attempts.as_ref()?;
        attempts.contains(problem_id).then(|| attempts.language(problem_id))
    }

    pub fn final_result(&self) -> Option<FinalSubmissionResult> {
        self.inner.lock().final_result.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn submission_latch(&self) -> LatchState {
        self.inner.gateway.submission_latch()
    }
}

fn ensure_known(state: &SessionState, problem_id: &ProblemId) -> Result<(), SessionError> {
    match state.attempts.as_ref() {
        Some(attempts) if attempts.contains(problem_id) => Ok(()),
        _ => Err(SessionError::UnknownProblem(problem_id.clone())),
    }
}
