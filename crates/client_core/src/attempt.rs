//! State machine for one timed exam attempt.
//!
//! `loading → error | active → submitting → submitted`, with
//! `submitting → active` when the backend refuses or the network drops the
//! submission. The controller is synchronous; [`crate::runner`] drives it
//! from the timer and user commands.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Answer, Attempt, AttemptId, Exam, ExamId, OptionId, QuestionId, QuestionType, UserId},
    protocol::{AnswerRecord, SubmitExamRequest, SubmitExamResponse},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ErrorCategory, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Loading,
    Error,
    Active,
    Submitting,
    Submitted,
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Loading => "loading",
            Self::Error => "error",
            Self::Active => "active",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Manual,
    Timeout,
}

/// One-shot gate shared by the manual and timer submit paths. Closing it is a
/// compare-and-set, so only one caller can win.
#[derive(Debug, Default)]
pub struct SubmitGate {
    closed: AtomicBool,
}

impl SubmitGate {
    /// Returns true for exactly one caller until the gate is reopened.
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    #[error("answers are read-only while the attempt is {0}")]
    ReadOnly(AttemptPhase),
    #[error("the attempt is not ready yet ({0})")]
    NotReady(AttemptPhase),
    #[error("the attempt has already been submitted")]
    AlreadySubmitted,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A failure as shown to the student.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub category: ErrorCategory,
    pub message: String,
    pub detail: String,
    pub requires_reauth: bool,
}

impl AttemptFailure {
    fn for_load(err: &ClientError) -> Self {
        let category = err.category();
        let message = match category {
            ErrorCategory::NotFound => {
                "Exam not found. Check the exam code and try again.".to_string()
            }
            ErrorCategory::Forbidden => "You do not have access to this exam.".to_string(),
            ErrorCategory::Validation | ErrorCategory::Network => {
                "Something went wrong while loading the exam. Please try again later.".to_string()
            }
        };
        Self {
            category,
            message,
            detail: err.to_string(),
            requires_reauth: err.requires_reauth(),
        }
    }

    fn for_submit(err: &ClientError) -> Self {
        Self {
            category: err.category(),
            message: format!("Submission failed: {}", err.user_message()),
            detail: err.to_string(),
            requires_reauth: err.requires_reauth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub total_score: f64,
    pub max_score: f64,
    /// Essay answers still wait for a teacher, so the score is not final.
    pub partial: bool,
    pub trigger: SubmitTrigger,
    pub message: Option<String>,
}

/// Everything needed to issue one submit request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTicket {
    pub exam_id: ExamId,
    pub trigger: SubmitTrigger,
    pub request: SubmitExamRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No countdown is running (untimed, not active, or already at zero).
    Idle,
    Counted(u32),
    /// The clock hit zero and won the submit gate.
    Expired(SubmissionTicket),
}

#[derive(Debug)]
pub struct AttemptController {
    exam_id: ExamId,
    user_id: UserId,
    phase: AttemptPhase,
    exam: Option<Exam>,
    attempt: Option<Attempt>,
    remaining: Option<u32>,
    gate: Arc<SubmitGate>,
    pending_trigger: Option<SubmitTrigger>,
    load_failure: Option<AttemptFailure>,
    submit_failure: Option<AttemptFailure>,
    result: Option<AttemptResult>,
}

impl AttemptController {
    pub fn new(exam_id: ExamId, user_id: UserId) -> Self {
        Self {
            exam_id,
            user_id,
            phase: AttemptPhase::Loading,
            exam: None,
            attempt: None,
            remaining: None,
            gate: Arc::new(SubmitGate::default()),
            pending_trigger: None,
            load_failure: None,
            submit_failure: None,
            result: None,
        }
    }

    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn phase(&self) -> AttemptPhase {
        self.phase
    }

    pub fn exam(&self) -> Option<&Exam> {
        self.exam.as_ref()
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        self.attempt.as_ref()
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining
    }

    pub fn submit_gate(&self) -> Arc<SubmitGate> {
        Arc::clone(&self.gate)
    }

    pub fn load_failure(&self) -> Option<&AttemptFailure> {
        self.load_failure.as_ref()
    }

    pub fn submit_failure(&self) -> Option<&AttemptFailure> {
        self.submit_failure.as_ref()
    }

    pub fn result(&self) -> Option<&AttemptResult> {
        self.result.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.phase != AttemptPhase::Active
    }

    /// Exam definition and attempt id are both in hand: start the clock.
    pub fn loaded(
        &mut self,
        exam: Exam,
        attempt_id: AttemptId,
        started_at: DateTime<Utc>,
    ) -> Result<(), AttemptError> {
        if self.phase != AttemptPhase::Loading {
            return Err(AttemptError::NotReady(self.phase));
        }
        if exam.id != self.exam_id {
            warn!(
                requested = self.exam_id.0,
                received = exam.id.0,
                "attempt: backend returned a different exam id"
            );
        }
        self.remaining = exam.countdown_seconds();
        self.attempt = Some(Attempt::open(
            attempt_id,
            self.exam_id,
            self.user_id,
            started_at,
        ));
        self.exam = Some(exam);
        self.phase = AttemptPhase::Active;
        info!(
            exam_id = self.exam_id.0,
            attempt_id = attempt_id.0,
            remaining_seconds = self.remaining,
            "attempt: active"
        );
        Ok(())
    }

    pub fn load_failed(&mut self, err: &ClientError) {
        if self.phase != AttemptPhase::Loading {
            debug!(phase = %self.phase, "attempt: ignoring late load failure");
            return;
        }
        let failure = AttemptFailure::for_load(err);
        warn!(
            exam_id = self.exam_id.0,
            category = ?failure.category,
            status = ?err.status(),
            error = %err,
            "attempt: load failed"
        );
        self.load_failure = Some(failure);
        self.phase = AttemptPhase::Error;
    }

    fn editable(&mut self) -> Result<(&Exam, &mut Attempt), AttemptError> {
        if self.phase != AttemptPhase::Active {
            return Err(AttemptError::ReadOnly(self.phase));
        }
        match (self.exam.as_ref(), self.attempt.as_mut()) {
            (Some(exam), Some(attempt)) if !attempt.terminal => Ok((exam, attempt)),
            _ => Err(AttemptError::ReadOnly(self.phase)),
        }
    }

    /// Single-select: a new choice replaces any earlier one for the question.
    pub fn select_option(
        &mut self,
        question_id: QuestionId,
        option_id: OptionId,
    ) -> Result<(), AttemptError> {
        let (exam, attempt) = self.editable()?;
        let question = exam
            .question(question_id)
            .ok_or(ValidationError::UnknownQuestion(question_id))?;
        if question.question_type != QuestionType::MultipleChoice {
            return Err(ValidationError::NotMultipleChoice(question_id).into());
        }
        if !question.has_option(option_id) {
            return Err(ValidationError::ForeignOption {
                question: question_id,
                option: option_id,
            }
            .into());
        }
        attempt
            .answers
            .insert(question_id, Answer::Choice(option_id));
        Ok(())
    }

    pub fn edit_essay(
        &mut self,
        question_id: QuestionId,
        text: impl Into<String>,
    ) -> Result<(), AttemptError> {
        let (exam, attempt) = self.editable()?;
        let question = exam
            .question(question_id)
            .ok_or(ValidationError::UnknownQuestion(question_id))?;
        if question.question_type != QuestionType::Essay {
            return Err(ValidationError::NotEssay(question_id).into());
        }
        attempt
            .answers
            .insert(question_id, Answer::Essay(text.into()));
        Ok(())
    }

    /// One record per question, in exam order. Unanswered questions keep
    /// their record with the answer field left empty.
    pub fn answer_records(&self) -> Vec<AnswerRecord> {
        let (Some(exam), Some(attempt)) = (self.exam.as_ref(), self.attempt.as_ref()) else {
            return Vec::new();
        };
        exam.questions
            .iter()
            .map(|question| match question.question_type {
                QuestionType::MultipleChoice => AnswerRecord {
                    question_id: question.id,
                    selected_option_id: attempt.selected_option(question.id),
                    essay_answer: None,
                },
                QuestionType::Essay => AnswerRecord {
                    question_id: question.id,
                    selected_option_id: None,
                    essay_answer: attempt.essay_text(question.id).map(str::to_string),
                },
            })
            .collect()
    }

    /// Advances the countdown by one second. Only counts while active; the
    /// zero crossing tries the submit gate once and never again.
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != AttemptPhase::Active {
            return TickOutcome::Idle;
        }
        let Some(remaining) = self.remaining else {
            return TickOutcome::Idle;
        };
        if remaining == 0 {
            return TickOutcome::Idle;
        }

        let remaining = remaining - 1;
        self.remaining = Some(remaining);
        if remaining > 0 {
            return TickOutcome::Counted(remaining);
        }

        info!(exam_id = self.exam_id.0, "attempt: time is up");
        match self.begin_submit(SubmitTrigger::Timeout) {
            Ok(ticket) => TickOutcome::Expired(ticket),
            Err(err) => {
                debug!(error = %err, "attempt: timeout submit skipped");
                TickOutcome::Counted(0)
            }
        }
    }

    /// Moves `active → submitting` if this caller wins the submit gate.
    pub fn begin_submit(&mut self, trigger: SubmitTrigger) -> Result<SubmissionTicket, AttemptError> {
        match self.phase {
            AttemptPhase::Active => {}
            AttemptPhase::Submitting | AttemptPhase::Submitted => {
                return Err(AttemptError::AlreadySubmitted)
            }
            AttemptPhase::Loading | AttemptPhase::Error => {
                return Err(AttemptError::NotReady(self.phase))
            }
        }
        let Some(attempt_id) = self.attempt.as_ref().map(|attempt| attempt.id) else {
            return Err(AttemptError::NotReady(self.phase));
        };
        if !self.gate.try_close() {
            return Err(AttemptError::AlreadySubmitted);
        }

        let request = SubmitExamRequest {
            attempt_id,
            answers: self.answer_records(),
        };
        self.phase = AttemptPhase::Submitting;
        self.pending_trigger = Some(trigger);
        self.submit_failure = None;
        info!(
            exam_id = self.exam_id.0,
            attempt_id = attempt_id.0,
            trigger = ?trigger,
            "attempt: submitting"
        );
        Ok(SubmissionTicket {
            exam_id: self.exam_id,
            trigger,
            request,
        })
    }

    pub fn submit_succeeded(&mut self, response: SubmitExamResponse) -> Option<&AttemptResult> {
        if self.phase != AttemptPhase::Submitting {
            debug!(phase = %self.phase, "attempt: ignoring unexpected submit response");
            return None;
        }
        let trigger = self.pending_trigger.take().unwrap_or(SubmitTrigger::Manual);
        let (partial, max_score) = self
            .exam
            .as_ref()
            .map(|exam| (exam.has_essay(), exam.max_score()))
            .unwrap_or((false, 0.0));
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.terminal = true;
            attempt.total_score = Some(response.total_score);
        }
        self.phase = AttemptPhase::Submitted;
        info!(
            exam_id = self.exam_id.0,
            total_score = response.total_score,
            partial,
            "attempt: submitted"
        );
        self.result = Some(AttemptResult {
            total_score: response.total_score,
            max_score,
            partial,
            trigger,
            message: response.message,
        });
        self.result.as_ref()
    }

    /// Rolls back to `active` so the student can retry.
    pub fn submit_failed(&mut self, err: &ClientError) {
        if self.phase != AttemptPhase::Submitting {
            debug!(phase = %self.phase, "attempt: ignoring unexpected submit failure");
            return;
        }
        self.pending_trigger = None;
        self.phase = AttemptPhase::Active;
        self.gate.reopen();
        let failure = AttemptFailure::for_submit(err);
        warn!(
            exam_id = self.exam_id.0,
            category = ?failure.category,
            status = ?err.status(),
            error = %err,
            "attempt: submit failed, answers remain editable"
        );
        self.submit_failure = Some(failure);
    }
}

#[cfg(test)]
#[path = "tests/attempt_tests.rs"]
mod tests;
