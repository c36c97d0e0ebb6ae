//! Async driver for [`AttemptController`]: loads the exam, runs the
//! one-second clock, applies user commands and issues submissions without
//! blocking the clock.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::{Answer, AttemptId, Exam, ExamId, OptionId, QuestionId, UserId},
    protocol::SubmitExamResponse,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    attempt::{
        AttemptController, AttemptError, AttemptFailure, AttemptPhase, AttemptResult,
        SubmissionTicket, SubmitTrigger, TickOutcome,
    },
    error::ClientError,
    ExamBackend,
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptCommand {
    SelectOption {
        question_id: QuestionId,
        option_id: OptionId,
    },
    EditEssay {
        question_id: QuestionId,
        text: String,
    },
    /// Confirmed "submit now".
    Submit,
    /// The view went away: stop the clock and drop anything in flight.
    Close,
}

#[derive(Debug, Clone)]
pub enum AttemptEvent {
    Loaded {
        exam: Exam,
        attempt_id: AttemptId,
        remaining_seconds: Option<u32>,
    },
    LoadFailed(AttemptFailure),
    Tick {
        remaining_seconds: u32,
    },
    /// The runner accepted the edit; `answer` is what will be submitted.
    AnswerRecorded {
        question_id: QuestionId,
        answer: Answer,
    },
    AnswerRejected {
        question_id: QuestionId,
        reason: AttemptError,
    },
    SubmitRejected(AttemptError),
    Submitting {
        trigger: SubmitTrigger,
    },
    Submitted(AttemptResult),
    SubmitFailed(AttemptFailure),
}

type SubmitOutcome = Result<SubmitExamResponse, ClientError>;

pub struct AttemptRunner {
    backend: Arc<dyn ExamBackend>,
    controller: AttemptController,
    events: mpsc::Sender<AttemptEvent>,
    tick_interval: Duration,
}

impl AttemptRunner {
    pub fn new(
        backend: Arc<dyn ExamBackend>,
        exam_id: ExamId,
        user_id: UserId,
        events: mpsc::Sender<AttemptEvent>,
    ) -> Self {
        Self {
            backend,
            controller: AttemptController::new(exam_id, user_id),
            events,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    fn emit(&self, event: AttemptEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("attempt: event queue full, dropping event"),
            Err(TrySendError::Closed(_)) => debug!("attempt: event receiver gone"),
        }
    }

    /// Outcome events wait for queue space instead of being dropped.
    async fn emit_outcome(&self, event: AttemptEvent) {
        if self.events.send(event).await.is_err() {
            debug!("attempt: event receiver gone");
        }
    }

    /// Runs until the attempt is submitted, fails to load, or the command
    /// channel is closed. Returns the controller in its final state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<AttemptCommand>) -> AttemptController {
        let exam_id = self.controller.exam_id();
        let user_id = self.controller.user_id();

        let backend = Arc::clone(&self.backend);
        let loaded = tokio::select! {
            outcome = load(backend, exam_id, user_id) => Some(outcome),
            _ = closed_while_loading(&mut commands) => None,
        };

        match loaded {
            None => {
                info!(exam_id = exam_id.0, "attempt: view closed during load");
                return self.controller;
            }
            Some(Err(err)) => {
                self.controller.load_failed(&err);
                if let Some(failure) = self.controller.load_failure().cloned() {
                    self.emit_outcome(AttemptEvent::LoadFailed(failure)).await;
                }
                return self.controller;
            }
            Some(Ok((exam, attempt_id))) => {
                let event_exam = exam.clone();
                if let Err(err) = self.controller.loaded(exam, attempt_id, Utc::now()) {
                    warn!(error = %err, "attempt: could not apply loaded exam");
                    return self.controller;
                }
                self.emit(AttemptEvent::Loaded {
                    exam: event_exam,
                    attempt_id,
                    remaining_seconds: self.controller.remaining_seconds(),
                });
            }
        }

        self.run_active(commands).await
    }

    async fn run_active(
        mut self,
        mut commands: mpsc::Receiver<AttemptCommand>,
    ) -> AttemptController {
        let period = self.tick_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<SubmitOutcome>(1);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.controller.remaining_seconds().is_some() => {
                    match self.controller.tick() {
                        TickOutcome::Idle => {}
                        TickOutcome::Counted(remaining_seconds) => {
                            self.emit(AttemptEvent::Tick { remaining_seconds });
                        }
                        TickOutcome::Expired(ticket) => {
                            self.emit(AttemptEvent::Tick { remaining_seconds: 0 });
                            in_flight = Some(self.dispatch(ticket, outcome_tx.clone()));
                        }
                    }
                }
                command = commands.recv() => match command {
                    None | Some(AttemptCommand::Close) => {
                        if let Some(task) = in_flight.take() {
                            task.abort();
                        }
                        info!(
                            exam_id = self.controller.exam_id().0,
                            phase = %self.controller.phase(),
                            "attempt: view closed"
                        );
                        return self.controller;
                    }
                    Some(AttemptCommand::SelectOption { question_id, option_id }) => {
                        let outcome = self
                            .controller
                            .select_option(question_id, option_id)
                            .map(|()| Answer::Choice(option_id));
                        self.report_edit(question_id, outcome);
                    }
                    Some(AttemptCommand::EditEssay { question_id, text }) => {
                        let outcome = self
                            .controller
                            .edit_essay(question_id, text.clone())
                            .map(|()| Answer::Essay(text));
                        self.report_edit(question_id, outcome);
                    }
                    Some(AttemptCommand::Submit) => {
                        match self.controller.begin_submit(SubmitTrigger::Manual) {
                            Ok(ticket) => {
                                in_flight = Some(self.dispatch(ticket, outcome_tx.clone()));
                            }
                            Err(err) => self.emit(AttemptEvent::SubmitRejected(err)),
                        }
                    }
                },
                Some(outcome) = outcome_rx.recv() => {
                    in_flight = None;
                    match outcome {
                        Ok(response) => {
                            if let Some(result) = self.controller.submit_succeeded(response).cloned() {
                                self.emit_outcome(AttemptEvent::Submitted(result)).await;
                            }
                        }
                        Err(err) => {
                            self.controller.submit_failed(&err);
                            if let Some(failure) = self.controller.submit_failure().cloned() {
                                self.emit_outcome(AttemptEvent::SubmitFailed(failure)).await;
                            }
                        }
                    }
                }
            }

            if self.controller.phase() == AttemptPhase::Submitted {
                return self.controller;
            }
        }
    }

    fn report_edit(&self, question_id: QuestionId, outcome: Result<Answer, AttemptError>) {
        match outcome {
            Ok(answer) => self.emit(AttemptEvent::AnswerRecorded {
                question_id,
                answer,
            }),
            Err(reason) => self.emit(AttemptEvent::AnswerRejected {
                question_id,
                reason,
            }),
        }
    }

    fn dispatch(
        &self,
        ticket: SubmissionTicket,
        outcome_tx: mpsc::Sender<SubmitOutcome>,
    ) -> JoinHandle<()> {
        self.emit(AttemptEvent::Submitting {
            trigger: ticket.trigger,
        });
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let outcome = backend
                .submit_attempt(ticket.exam_id, &ticket.request)
                .await;
            if outcome_tx.send(outcome).await.is_err() {
                debug!("attempt: submission finished after the view closed");
            }
        })
    }
}

async fn load(
    backend: Arc<dyn ExamBackend>,
    exam_id: ExamId,
    user_id: UserId,
) -> Result<(Exam, AttemptId), ClientError> {
    let exam = backend.fetch_exam(exam_id).await?;
    let attempt_id = backend.start_attempt(exam_id, user_id).await?;
    Ok((exam, attempt_id))
}

async fn closed_while_loading(commands: &mut mpsc::Receiver<AttemptCommand>) {
    loop {
        match commands.recv().await {
            None | Some(AttemptCommand::Close) => return,
            Some(other) => debug!(command = ?other, "attempt: ignoring command while loading"),
        }
    }
}

#[cfg(test)]
#[path = "tests/runner_tests.rs"]
mod tests;
