//! Interactive exam session: stdin lines become attempt commands, runner
//! events are printed as they arrive.

use std::{collections::VecDeque, sync::Arc};

use anyhow::{bail, Result};
use client_core::{
    attempt::{AttemptError, AttemptPhase, SubmitTrigger},
    AttemptCommand, AttemptEvent, AttemptRunner, ClientError, ExamClient,
};
use shared::{
    domain::{Attempt, AttemptId, Exam, ExamId, Question, UserId},
    error::ApiError,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::{self, error::TrySendError},
};
use tracing::debug;

use crate::render;

#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    Command(AttemptCommand),
    AskSubmit,
    Show,
    Help,
    Quit,
}

/// Turns one line of student input into an action against `exam`.
/// Question numbers are 1-based and options are letters, as printed.
pub fn parse_input(line: &str, exam: &Exam) -> Result<InputAction, String> {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" | "show" => return Ok(InputAction::Show),
        "help" | "?" => return Ok(InputAction::Help),
        "submit" => return Ok(InputAction::AskSubmit),
        "quit" | "q" => return Ok(InputAction::Quit),
        _ => {}
    }

    if let Some(rest) = line.strip_prefix("e ").or_else(|| line.strip_prefix("E ")) {
        let rest = rest.trim_start();
        let (number, text) = rest.split_once(' ').unwrap_or((rest, ""));
        let question = question_at(exam, number)?;
        return Ok(InputAction::Command(AttemptCommand::EditEssay {
            question_id: question.id,
            text: text.trim().to_string(),
        }));
    }

    let mut parts = line.split_whitespace();
    let (Some(number), Some(letter), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("unrecognised input '{line}'; type `help`"));
    };
    let question = question_at(exam, number)?;
    let mut chars = letter.chars();
    let index = match (chars.next(), chars.next()) {
        (Some(ch), None) => render::option_index(ch),
        _ => None,
    }
    .ok_or_else(|| format!("'{letter}' is not an option letter"))?;
    let option = question
        .options
        .get(index)
        .ok_or_else(|| format!("question {number} has no option {letter}"))?;
    Ok(InputAction::Command(AttemptCommand::SelectOption {
        question_id: question.id,
        option_id: option.id,
    }))
}

fn question_at<'a>(exam: &'a Exam, number: &str) -> Result<&'a Question, String> {
    number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| exam.questions.get(index))
        .ok_or_else(|| format!("there is no question {number}"))
}

/// Queues `cmd` for the runner. Returns false when it could not be queued;
/// `status` then says why.
pub fn dispatch_attempt_command(
    cmd_tx: &mpsc::Sender<AttemptCommand>,
    cmd: AttemptCommand,
    status: &mut Option<String>,
) -> bool {
    let cmd_name = match &cmd {
        AttemptCommand::SelectOption { .. } => "select_option",
        AttemptCommand::EditEssay { .. } => "edit_essay",
        AttemptCommand::Submit => "submit",
        AttemptCommand::Close => "close",
    };

    match cmd_tx.try_send(cmd) {
        Ok(()) => {
            debug!(command = cmd_name, "queued attempt command");
            true
        }
        Err(TrySendError::Full(_)) => {
            *status = Some("Too many pending actions; please retry".to_string());
            false
        }
        Err(TrySendError::Closed(_)) => {
            *status = Some("The attempt is no longer running".to_string());
            false
        }
    }
}

/// What the terminal knows about the attempt. The runner owns the real
/// answers; `answers` only mirrors edits it has accepted.
pub struct TakeState {
    exam: Option<Exam>,
    answers: Attempt,
    awaiting_confirm: bool,
    /// Lines typed before the exam arrived, replayed once it does.
    queued_lines: VecDeque<String>,
    input_closed: bool,
    submit_pending: bool,
    close_when_settled: bool,
    rejected_credentials: bool,
}

impl TakeState {
    pub fn new(exam_id: ExamId, user_id: UserId) -> Self {
        Self {
            exam: None,
            answers: Attempt::open(AttemptId(0), exam_id, user_id, chrono::Utc::now()),
            awaiting_confirm: false,
            queued_lines: VecDeque::new(),
            input_closed: false,
            submit_pending: false,
            close_when_settled: false,
            rejected_credentials: false,
        }
    }

    pub fn answers(&self) -> &Attempt {
        &self.answers
    }

    pub fn handle_event(
        &mut self,
        event: AttemptEvent,
        cmd_tx: &mpsc::Sender<AttemptCommand>,
        status: &mut Option<String>,
    ) {
        match event {
            AttemptEvent::Loaded {
                exam,
                attempt_id,
                remaining_seconds,
            } => {
                self.answers.id = attempt_id;
                println!("{}", render::exam_sheet(&exam, Some(&self.answers)));
                if let Some(remaining) = remaining_seconds {
                    println!("{}", render::countdown_line(remaining));
                }
                println!("{}", render::answer_help());
                self.exam = Some(exam);
                while let Some(line) = self.queued_lines.pop_front() {
                    self.handle_line(&line, cmd_tx, status);
                }
                if self.input_closed {
                    self.close_when_idle(cmd_tx, status);
                }
            }
            AttemptEvent::LoadFailed(failure) => {
                eprintln!("{}", failure.message);
                self.rejected_credentials |= failure.requires_reauth;
            }
            AttemptEvent::Tick { remaining_seconds } => {
                if render::should_announce(remaining_seconds) {
                    println!("{}", render::countdown_line(remaining_seconds));
                }
            }
            AttemptEvent::AnswerRecorded {
                question_id,
                answer,
            } => {
                debug!(question_id = question_id.0, "answer recorded");
                self.answers.answers.insert(question_id, answer);
            }
            AttemptEvent::AnswerRejected { reason, .. } => {
                eprintln!("Answer not saved: {reason}");
            }
            AttemptEvent::SubmitRejected(reason) => {
                eprintln!("{reason}");
                // Already submitting means another submission owns the outcome.
                if reason != AttemptError::AlreadySubmitted {
                    self.submit_settled(cmd_tx, status);
                }
            }
            AttemptEvent::Submitting { trigger } => {
                self.submit_pending = true;
                match trigger {
                    SubmitTrigger::Timeout => println!("Time is up! Submitting your answers..."),
                    SubmitTrigger::Manual => println!("Submitting..."),
                }
            }
            AttemptEvent::Submitted(result) => {
                self.submit_pending = false;
                println!("{}", render::result_summary(&result));
            }
            AttemptEvent::SubmitFailed(failure) => {
                eprintln!("{}", failure.message);
                if failure.requires_reauth {
                    eprintln!("Your session has expired; run `login` again.");
                    self.rejected_credentials = true;
                } else if !self.input_closed {
                    eprintln!("Your answers are still here; type `submit` to try again.");
                }
                self.submit_settled(cmd_tx, status);
            }
        }
    }

    pub fn handle_line(
        &mut self,
        line: &str,
        cmd_tx: &mpsc::Sender<AttemptCommand>,
        status: &mut Option<String>,
    ) {
        if std::mem::take(&mut self.awaiting_confirm) {
            if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                if dispatch_attempt_command(cmd_tx, AttemptCommand::Submit, status) {
                    self.submit_pending = true;
                }
            } else {
                println!("Not submitted.");
            }
            return;
        }

        let Some(exam) = self.exam.as_ref() else {
            if matches!(line.trim().to_ascii_lowercase().as_str(), "q" | "quit") {
                self.queued_lines.clear();
                dispatch_attempt_command(cmd_tx, AttemptCommand::Close, status);
            } else {
                self.queued_lines.push_back(line.to_string());
            }
            return;
        };

        match parse_input(line, exam) {
            Ok(InputAction::Command(cmd)) => {
                dispatch_attempt_command(cmd_tx, cmd, status);
            }
            Ok(InputAction::AskSubmit) => {
                let unanswered = exam
                    .questions
                    .iter()
                    .filter(|question| self.answers.answer(question.id).is_none())
                    .count();
                if unanswered > 0 {
                    println!("{unanswered} question(s) are unanswered.");
                }
                println!("Submit now? [y/N]");
                self.awaiting_confirm = true;
            }
            Ok(InputAction::Show) => println!("{}", render::exam_sheet(exam, Some(&self.answers))),
            Ok(InputAction::Help) => println!("{}", render::answer_help()),
            Ok(InputAction::Quit) => {
                dispatch_attempt_command(cmd_tx, AttemptCommand::Close, status);
            }
            Err(message) => *status = Some(message),
        }
    }

    /// Input ended. Lines still waiting for the exam and any submission in
    /// flight are seen through before the view closes.
    pub fn end_of_input(&mut self, cmd_tx: &mpsc::Sender<AttemptCommand>, status: &mut Option<String>) {
        self.input_closed = true;
        if self.exam.is_none() && !self.queued_lines.is_empty() {
            return;
        }
        self.close_when_idle(cmd_tx, status);
    }

    fn close_when_idle(&mut self, cmd_tx: &mpsc::Sender<AttemptCommand>, status: &mut Option<String>) {
        if self.submit_pending {
            self.close_when_settled = true;
        } else {
            dispatch_attempt_command(cmd_tx, AttemptCommand::Close, status);
        }
    }

    fn submit_settled(&mut self, cmd_tx: &mpsc::Sender<AttemptCommand>, status: &mut Option<String>) {
        self.submit_pending = false;
        if std::mem::take(&mut self.close_when_settled) {
            dispatch_attempt_command(cmd_tx, AttemptCommand::Close, status);
        }
    }

    /// The backend refused the stored credential during this attempt.
    pub fn rejected_credentials(&self) -> bool {
        self.rejected_credentials
    }
}

pub async fn run(client: ExamClient, exam_id: ExamId, user_id: UserId) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, events) = mpsc::channel(256);
    let runner = AttemptRunner::new(Arc::new(client), exam_id, user_id, event_tx);
    let handle = tokio::spawn(runner.run(cmd_rx));

    println!("Loading exam {exam_id}...");
    let state = drive(
        BufReader::new(tokio::io::stdin()),
        TakeState::new(exam_id, user_id),
        cmd_tx,
        events,
    )
    .await;
    let controller = handle.await?;
    finish(&state, controller.phase(), exam_id)
}

/// Feeds input lines to the runner and prints its events until the runner
/// stops.
pub async fn drive<R>(
    input: R,
    mut state: TakeState,
    cmd_tx: mpsc::Sender<AttemptCommand>,
    mut events: mpsc::Receiver<AttemptEvent>,
) -> TakeState
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        let mut status = None;
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                state.handle_event(event, &cmd_tx, &mut status);
            }
            line = lines.next_line(), if input_open => match line {
                Ok(Some(line)) => state.handle_line(&line, &cmd_tx, &mut status),
                Ok(None) | Err(_) => {
                    input_open = false;
                    state.end_of_input(&cmd_tx, &mut status);
                }
            },
        }
        if let Some(status) = status {
            eprintln!("{status}");
        }
    }
    state
}

pub fn finish(state: &TakeState, phase: AttemptPhase, exam_id: ExamId) -> Result<()> {
    if phase == AttemptPhase::Submitted {
        return Ok(());
    }
    if state.rejected_credentials() {
        let err = ApiError::new(401, "Your session has expired; run `login` again.");
        return Err(ClientError::from(err).into());
    }
    match phase {
        AttemptPhase::Error => bail!("could not start exam {exam_id}"),
        phase => {
            println!("Left the exam without submitting (state: {phase}).");
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "tests/take_tests.rs"]
mod tests;
