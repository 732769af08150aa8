use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Sleep;

use crate::core::config::Settings;
use crate::core::metrics;
use crate::core::shutdown::{termination_signal, TerminationSignal};
use crate::core::time::format_offset;
use crate::services::HttpGradingBackend;
use crate::session::{
    AttemptSummary, Clock, FinalSubmissionResult, HeadlessFullscreen, Language, Problem,
    ProblemId, RunResult, SessionConfig, SessionController, SessionError, SessionStatus,
    SubmitTrigger, UnsupportedLanguage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Start,
    Problems,
    Select(usize),
    Language(usize, Language),
    Load(usize, PathBuf),
    Code(usize),
    Run(usize),
    Status,
    Submit,
    Fullscreen(bool),
    Metrics,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Language(#[from] UnsupportedLanguage),
}

impl Command {
    /// `Ok(None)` for blank lines.
    fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "problems" => Self::Problems,
            "select" => Self::Select(ordinal(words.next(), "select N")?),
            "lang" => {
                let index = ordinal(words.next(), "lang N LANGUAGE")?;
                let language = words.next().ok_or(CommandError::Usage("lang N LANGUAGE"))?;
                Self::Language(index, language.parse()?)
            }
            "load" => {
                let index = ordinal(words.next(), "load N PATH")?;
                let path: Vec<&str> = words.by_ref().collect();
                if path.is_empty() {
                    return Err(CommandError::Usage("load N PATH"));
                }
                Self::Load(index, PathBuf::from(path.join(" ")))
            }
            "code" => Self::Code(ordinal(words.next(), "code N")?),
            "run" => Self::Run(ordinal(words.next(), "run N")?),
            "status" => Self::Status,
            "submit" => Self::Submit,
            "fullscreen" => match words.next() {
                Some("on") => Self::Fullscreen(true),
                Some("off") => Self::Fullscreen(false),
                _ => return Err(CommandError::Usage("fullscreen on|off")),
            },
            "metrics" => Self::Metrics,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn ordinal(word: Option<&str>, usage: &'static str) -> Result<usize, CommandError> {
    word.and_then(|word| word.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .ok_or(CommandError::Usage(usage))
}

#[derive(Debug, Serialize)]
struct ProblemView<'a> {
    ordinal: usize,
    id: &'a ProblemId,
    title: &'a str,
    difficulty: Option<&'a str>,
}

impl<'a> From<&'a Problem> for ProblemView<'a> {
    fn from(problem: &'a Problem) -> Self {
        Self {
            ordinal: problem.ordinal,
            id: &problem.id,
            title: &problem.title,
            difficulty: problem.difficulty.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    Started {
        session_id: &'a str,
        deadline: Option<String>,
        countdown: String,
        problems: Vec<ProblemView<'a>>,
    },
    Problems { problems: Vec<ProblemView<'a>> },
    Selected { problem: &'a Problem },
    Code { problem_id: &'a ProblemId, language: Language, code: &'a str },
    RunResult { problem_id: &'a ProblemId, result: &'a RunResult },
    Status {
        status: SessionStatus,
        remaining_seconds: u64,
        countdown: String,
        low_time: bool,
        violation_visible: bool,
        attempts: Vec<AttemptSummary>,
    },
    StatusChanged { status: SessionStatus },
    Submitted { result: &'a FinalSubmissionResult },
    Metrics { exposition: String },
    Warning { message: String },
    Error { message: String },
}

fn emit(event: &Event<'_>) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!(error = %err, "Failed to encode event"),
    }
}

fn emit_error(message: impl ToString) {
    emit(&Event::Error { message: message.to_string() });
}

/// Line-oriented driver for running an exam without a graphical shell. Commands arrive on
/// stdin and events leave on stdout as one JSON object per line.
pub(crate) async fn run(settings: &Settings) -> Result<()> {
    let (drive_id, candidate_id) = settings.identity().require()?;
    let backend = HttpGradingBackend::from_settings(settings)?;
    let platform = Arc::new(HeadlessFullscreen::new());

    let controller = SessionController::new(
        SessionConfig {
            drive_id: drive_id.to_string(),
            candidate_id: candidate_id.to_string(),
            default_language: settings.exam().default_language,
            require_fullscreen: settings.exam().require_fullscreen,
        },
        Clock::new(settings.exam().time_limit_seconds),
        Arc::new(backend),
        platform.clone(),
    );

    tracing::info!(
        session_id = %controller.session_id(),
        drive_id,
        backend = %settings.backend().api_root(),
        environment = settings.runtime().environment.as_str(),
        time_limit_seconds = settings.exam().time_limit_seconds,
        "Headless assessment driver ready"
    );

    let clock = controller.spawn_clock();
    let observer = controller.spawn_proctoring_observer();
    let result = drive(&controller, &platform, settings).await;
    clock.abort();
    if let Some(observer) = observer {
        observer.abort();
    }
    result
}

async fn drive(
    controller: &SessionController,
    platform: &Arc<HeadlessFullscreen>,
    settings: &Settings,
) -> Result<()> {
    let mut policy = RetryPolicy::from_settings(settings);
    let mut retry: Option<Pin<Box<Sleep>>> = None;

    let mut status = controller.subscribe_status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let termination = termination_signal();
    tokio::pin!(termination);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context("Failed to read command")?;
                let Some(line) = line else {
                    terminate(controller, "stdin closed", policy).await;
                    return Ok(());
                };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => {
                        terminate(controller, "quit", policy).await;
                        return Ok(());
                    }
                    Ok(Some(command)) => handle(controller, platform, command).await,
                    Ok(None) => {}
                    Err(err) => emit_error(err),
                }
            }
            signal = &mut termination => {
                terminate(controller, signal_reason(signal), policy).await;
                return Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = *status.borrow_and_update();
                emit(&Event::StatusChanged { status: current });
                match current {
                    SessionStatus::Completed => {
                        if let Some(result) = controller.final_result() {
                            emit(&Event::Submitted { result: &result });
                        }
                        return Ok(());
                    }
                    SessionStatus::Failed => {
                        emit_error(submission_failure(controller));
                        if policy.take() {
                            emit(&Event::Warning {
                                message: format!("retrying submission in {}s", policy.delay.as_secs()),
                            });
                            retry = Some(Box::pin(tokio::time::sleep(policy.delay)));
                        }
                    }
                    _ => {}
                }
            }
            () = wait_retry(&mut retry) => {
                retry = None;
                spawn_submit(controller, SubmitTrigger::Manual);
            }
        }
    }
}

/// Automatic resubmissions left after a failed final submission.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.exam().submit_retry_attempts,
            delay: Duration::from_secs(settings.exam().submit_retry_delay_seconds),
        }
    }

    /// Spends one retry; `false` once the budget is exhausted.
    fn take(&mut self) -> bool {
        if self.attempts == 0 {
            return false;
        }
        self.attempts -= 1;
        true
    }
}

fn submission_failure(controller: &SessionController) -> String {
    controller.last_error().unwrap_or_else(|| "submission failed".to_string())
}

fn wait_retry<'a>(retry: &'a mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + 'a {
    async move {
        match retry.as_mut() {
            Some(sleep) => sleep.await,
            None => std::future::pending().await,
        }
    }
}

fn signal_reason(signal: TerminationSignal) -> &'static str {
    match signal {
        TerminationSignal::Interrupt => "interrupted",
        TerminationSignal::Terminate => "terminated",
    }
}

fn spawn_submit(controller: &SessionController, trigger: SubmitTrigger) {
    let controller = controller.clone();
    tokio::spawn(async move {
        if let Err(err) = controller.submit_with(trigger).await {
            tracing::debug!(error = %err, trigger = trigger.as_str(), "Submission attempt ended");
        }
    });
}

/// Closing the driver is the termination trigger: in-progress work is submitted through
/// the same latch as every other trigger. A failed submission, ours or one already in
/// flight, is retried within the remaining budget before the driver gives up.
async fn terminate(controller: &SessionController, reason: &str, mut policy: RetryPolicy) {
    tracing::info!(session_id = %controller.session_id(), reason, "Driver shutting down");

    loop {
        match controller.submit_with(SubmitTrigger::Termination).await {
            Ok(result) => {
                emit(&Event::Submitted { result: &result });
                return;
            }
            Err(SessionError::SubmissionInProgress) => {
                let mut status = controller.subscribe_status();
                let _ = status.wait_for(|status| *status != SessionStatus::Submitting).await;
                if let Some(result) = controller.final_result() {
                    emit(&Event::Submitted { result: &result });
                    return;
                }
                emit_error(submission_failure(controller));
            }
            Err(SessionError::InvalidState { status, .. }) => {
                if status == SessionStatus::NotStarted {
                    tracing::info!("Session was never started; nothing to submit");
                }
                return;
            }
            Err(err) => emit_error(err),
        }

        if controller.status() != SessionStatus::Failed {
            return;
        }
        if !policy.take() {
            tracing::error!(
                session_id = %controller.session_id(),
                "Giving up on final submission"
            );
            emit_error("final submission failed and retries are exhausted; the exam was not graded");
            return;
        }
        emit(&Event::Warning {
            message: format!("retrying submission in {}s", policy.delay.as_secs()),
        });
        tokio::time::sleep(policy.delay).await;
    }
}

async fn handle(
    controller: &SessionController,
    platform: &Arc<HeadlessFullscreen>,
    command: Command,
) {
    let outcome = match command {
        Command::Start => start(controller).await,
        Command::Problems => {
            match controller.problems() {
                Some(problems) => emit(&Event::Problems {
                    problems: problems.iter().map(ProblemView::from).collect(),
                }),
                None => emit_error("session has not started"),
            }
            Ok(())
        }
        Command::Select(index) => resolve(controller, index).and_then(|id| {
            controller.select_problem(&id)?;
            if let Some(problem) = controller.selected_problem() {
                emit(&Event::Selected { problem: &problem });
            }
            Ok(())
        }),
        Command::Language(index, language) => resolve(controller, index).and_then(|id| {
            controller.select_language(&id, language)?;
            emit_code(controller, &id);
            Ok(())
        }),
        Command::Load(index, path) => match resolve(controller, index) {
            Ok(id) => match tokio::fs::read_to_string(&path).await {
                Ok(code) => controller.edit_code(&id, code).map(|()| emit_code(controller, &id)),
                Err(err) => {
                    emit_error(format!("cannot read {}: {err}", path.display()));
                    Ok(())
                }
            },
            Err(err) => Err(err),
        },
        Command::Code(index) => resolve(controller, index).map(|id| emit_code(controller, &id)),
        Command::Run(index) => resolve(controller, index).map(|id| spawn_run(controller, id)),
        Command::Status => {
            emit(&Event::Status {
                status: controller.status(),
                remaining_seconds: controller.time_remaining_seconds(),
                countdown: controller.countdown(),
                low_time: controller.low_time(),
                violation_visible: controller.proctoring_violation_visible(),
                attempts: controller.attempt_summaries(),
            });
            Ok(())
        }
        Command::Submit => {
            spawn_submit(controller, SubmitTrigger::Manual);
            Ok(())
        }
        Command::Fullscreen(engaged) => {
            platform.set_engaged(engaged);
            Ok(())
        }
        Command::Metrics => {
            match metrics::render() {
                Some(exposition) => emit(&Event::Metrics { exposition }),
                None => emit_error("metrics recorder is disabled"),
            }
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(err) = outcome {
        emit_error(err);
    }
}

async fn start(controller: &SessionController) -> Result<(), SessionError> {
    controller.start().await?;
    let problems = controller.problems();
    emit(&Event::Started {
        session_id: controller.session_id().as_str(),
        deadline: controller.deadline().map(format_offset),
        countdown: controller.countdown(),
        problems: problems
            .as_ref()
            .map(|problems| problems.iter().map(ProblemView::from).collect())
            .unwrap_or_default(),
    });
    if let Some(problem) = controller.selected_problem() {
        emit(&Event::Selected { problem: &problem });
    }
    Ok(())
}

fn resolve(controller: &SessionController, index: usize) -> Result<ProblemId, SessionError> {
    let status = controller.status();
    let problems = controller
        .problems()
        .ok_or(SessionError::InvalidState { action: "address a problem", status })?;
    problems
        .by_ordinal(index)
        .map(|problem| problem.id.clone())
        .ok_or_else(|| SessionError::UnknownProblem(ProblemId::new(index.to_string())))
}

fn emit_code(controller: &SessionController, problem_id: &ProblemId) {
    if let (Some(code), Some(language)) =
        (controller.code(problem_id), controller.language(problem_id))
    {
        emit(&Event::Code { problem_id, language, code: &code });
    }
}

fn spawn_run(controller: &SessionController, problem_id: ProblemId) {
    let controller = controller.clone();
    tokio::spawn(async move {
        match controller.run(&problem_id).await {
            Ok(result) => emit(&Event::RunResult { problem_id: &problem_id, result: &result }),
            Err(err) => emit_error(err),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_problem_commands() {
        assert_eq!(Command::parse("select 2"), Ok(Some(Command::Select(2))));
        assert_eq!(Command::parse("  RUN 1 "), Ok(Some(Command::Run(1))));
        assert_eq!(
            Command::parse("lang 3 JavaScript"),
            Ok(Some(Command::Language(3, Language::JavaScript)))
        );
        assert_eq!(
            Command::parse("load 1 /tmp/my solution.py"),
            Ok(Some(Command::Load(1, PathBuf::from("/tmp/my solution.py"))))
        );
        assert_eq!(Command::parse("fullscreen off"), Ok(Some(Command::Fullscreen(false))));
        assert_eq!(Command::parse(""), Ok(None));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(Command::parse("select 0"), Err(CommandError::Usage("select N")));
        assert_eq!(Command::parse("run"), Err(CommandError::Usage("run N")));
        assert_eq!(
            Command::parse("lang 1 rust"),
            Err(CommandError::Language(UnsupportedLanguage("rust".to_string())))
        );
        assert_eq!(
            Command::parse("fullscreen maybe"),
            Err(CommandError::Usage("fullscreen on|off"))
        );
        assert_eq!(Command::parse("pause"), Err(CommandError::Unknown("pause".to_string())));
    }

    use crate::test_support::{self, ScriptedBackend};

    fn quick_retries(attempts: u32) -> RetryPolicy {
        RetryPolicy { attempts, delay: Duration::ZERO }
    }

    async fn started(backend: &Arc<ScriptedBackend>) -> SessionController {
        let controller =
            test_support::controller(backend.clone(), Arc::new(HeadlessFullscreen::new()), 600);
        controller.start().await.expect("start");
        controller
    }

    #[tokio::test]
    async fn termination_retries_a_failed_submission_already_in_flight() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(2)));
        let controller = started(&backend).await;
        backend.fail_next_submits(1);
        let gate = backend.hold_submits();

        let manual = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit().await })
        };
        backend.wait_for_submits(1).await;

        let terminating = {
            let controller = controller.clone();
            tokio::spawn(async move { terminate(&controller, "quit", quick_retries(2)).await })
        };
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        gate.release();

        assert!(manual.await.expect("join").is_err());
        terminating.await.expect("join");
        assert_eq!(controller.status(), SessionStatus::Completed);
        assert_eq!(backend.submit_calls(), 2);
        assert_eq!(
            controller.final_result().map(|result| result.trigger),
            Some(SubmitTrigger::Manual)
        );
    }

    #[tokio::test]
    async fn termination_retries_its_own_failed_submission() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(1)));
        let controller = started(&backend).await;
        backend.fail_next_submits(2);

        terminate(&controller, "stdin closed", quick_retries(3)).await;

        assert_eq!(controller.status(), SessionStatus::Completed);
        assert_eq!(backend.submit_calls(), 3);
        assert_eq!(
            controller.final_result().map(|result| result.trigger),
            Some(SubmitTrigger::Termination)
        );
    }

    #[tokio::test]
    async fn termination_stops_when_retries_are_exhausted() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(1)));
        let controller = started(&backend).await;
        backend.fail_next_submits(10);

        terminate(&controller, "terminated", quick_retries(2)).await;

        assert_eq!(controller.status(), SessionStatus::Failed);
        assert_eq!(backend.submit_calls(), 3);
        assert!(controller.last_error().is_some());
    }

    #[tokio::test]
    async fn termination_before_start_submits_nothing() {
        let backend = Arc::new(ScriptedBackend::new(test_support::sample_payloads(1)));
        let controller =
            test_support::controller(backend.clone(), Arc::new(HeadlessFullscreen::new()), 600);

        terminate(&controller, "quit", quick_retries(3)).await;

        assert_eq!(controller.status(), SessionStatus::NotStarted);
        assert_eq!(backend.submit_calls(), 0);
    }

    #[test]
    fn retry_budget_is_spent_once_per_attempt() {
        let mut policy = quick_retries(1);
        assert!(policy.take());
        assert!(!policy.take());
    }

    #[test]
    fn events_are_tagged_json() {
        let line = serde_json::to_value(Event::StatusChanged { status: SessionStatus::Failed })
            .expect("event");
        assert_eq!(line, serde_json::json!({"event": "status_changed", "status": "failed"}));

        let result = RunResult::transport_failure("offline");
        let problem_id = ProblemId::from("p1");
        let line = serde_json::to_value(Event::RunResult { problem_id: &problem_id, result: &result })
            .expect("event");
        assert_eq!(line["event"], "run_result");
        assert_eq!(line["result"]["outcome"]["kind"], "transport_error");
    }
}
