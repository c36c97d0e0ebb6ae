use super::*;
use async_trait::async_trait;
use shared::{
    domain::{Answer, ExamOption, Question, QuestionType},
    error::ApiError,
    protocol::SubmitExamRequest,
};
use tokio::sync::Mutex;

use crate::error::ErrorCategory;

struct TestBackend {
    exam: Exam,
    start_status: Option<u16>,
    submit_failures_left: Mutex<u32>,
    submit_delay: Duration,
    submissions: Arc<Mutex<Vec<SubmitExamRequest>>>,
    start_calls: Arc<Mutex<u32>>,
}

impl TestBackend {
    fn new(exam: Exam) -> Self {
        Self {
            exam,
            start_status: None,
            submit_failures_left: Mutex::new(0),
            submit_delay: Duration::ZERO,
            submissions: Arc::new(Mutex::new(Vec::new())),
            start_calls: Arc::new(Mutex::new(0)),
        }
    }

    fn failing_start(mut self, status: u16) -> Self {
        self.start_status = Some(status);
        self
    }

    fn failing_submits(self, count: u32) -> Self {
        Self {
            submit_failures_left: Mutex::new(count),
            ..self
        }
    }

    fn slow_submit(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }
}

#[async_trait]
impl ExamBackend for TestBackend {
    async fn fetch_exam(&self, _exam_id: ExamId) -> Result<Exam, ClientError> {
        Ok(self.exam.clone())
    }

    async fn start_attempt(
        &self,
        _exam_id: ExamId,
        _user_id: UserId,
    ) -> Result<AttemptId, ClientError> {
        *self.start_calls.lock().await += 1;
        if let Some(status) = self.start_status {
            return Err(ApiError::new(status, "exam is not open").into());
        }
        Ok(AttemptId(500))
    }

    async fn submit_attempt(
        &self,
        _exam_id: ExamId,
        request: &SubmitExamRequest,
    ) -> Result<SubmitExamResponse, ClientError> {
        self.submissions.lock().await.push(request.clone());
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        let mut failures_left = self.submit_failures_left.lock().await;
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(ApiError::new(503, "grading service unavailable").into());
        }
        Ok(SubmitExamResponse {
            message: None,
            total_score: 3.0,
        })
    }
}

fn one_question_exam(duration: Option<u32>) -> Exam {
    Exam {
        id: ExamId(1),
        title: "Pop quiz".to_string(),
        description: None,
        duration,
        created_at: None,
        questions: vec![Question {
            id: QuestionId(11),
            content: "Pick one".to_string(),
            question_type: QuestionType::MultipleChoice,
            score: 3.0,
            options: vec![
                ExamOption {
                    id: OptionId(1),
                    content: "A".to_string(),
                },
                ExamOption {
                    id: OptionId(2),
                    content: "B".to_string(),
                },
            ],
        }],
    }
}

fn spawn_runner(
    backend: Arc<TestBackend>,
) -> (
    mpsc::Sender<AttemptCommand>,
    mpsc::Receiver<AttemptEvent>,
    JoinHandle<AttemptController>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(512);
    let runner = AttemptRunner::new(backend, ExamId(1), UserId(2), event_tx);
    let handle = tokio::spawn(runner.run(cmd_rx));
    (cmd_tx, event_rx, handle)
}

fn drain(events: &mut mpsc::Receiver<AttemptEvent>) -> Vec<AttemptEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn idle_student_is_auto_submitted_after_sixty_ticks() {
    let backend = Arc::new(TestBackend::new(one_question_exam(Some(1))));
    let submissions = Arc::clone(&backend.submissions);
    let (_cmd_tx, mut events, handle) = spawn_runner(backend);

    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Submitted);
    assert_eq!(controller.remaining_seconds(), Some(0));

    let submissions = submissions.lock().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].answers.len(), 1);
    assert_eq!(submissions[0].answers[0].question_id, QuestionId(11));
    assert_eq!(submissions[0].answers[0].selected_option_id, None);

    let events = drain(&mut events);
    let ticks: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            AttemptEvent::Tick { remaining_seconds } => Some(*remaining_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, (0..60).rev().collect::<Vec<u32>>());
    assert!(matches!(
        events.first(),
        Some(AttemptEvent::Loaded {
            remaining_seconds: Some(60),
            ..
        })
    ));
    assert!(events.iter().any(|event| matches!(
        event,
        AttemptEvent::Submitting {
            trigger: SubmitTrigger::Timeout
        }
    )));
    assert!(matches!(
        events.last(),
        Some(AttemptEvent::Submitted(AttemptResult {
            trigger: SubmitTrigger::Timeout,
            ..
        }))
    ));
}

#[tokio::test(start_paused = true)]
async fn forbidden_start_ends_in_error_without_countdown() {
    let backend = Arc::new(TestBackend::new(one_question_exam(Some(1))).failing_start(403));
    let submissions = Arc::clone(&backend.submissions);
    let (_cmd_tx, mut events, handle) = spawn_runner(backend);

    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Error);
    assert_eq!(controller.remaining_seconds(), None);
    assert_eq!(
        controller.load_failure().map(|failure| failure.category),
        Some(ErrorCategory::Forbidden)
    );
    assert!(submissions.lock().await.is_empty());

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], AttemptEvent::LoadFailed(failure) if failure.category == ErrorCategory::Forbidden));
}

#[tokio::test(start_paused = true)]
async fn manual_submit_in_flight_suppresses_timer_submission() {
    let backend = Arc::new(
        TestBackend::new(one_question_exam(Some(1))).slow_submit(Duration::from_secs(5)),
    );
    let submissions = Arc::clone(&backend.submissions);
    let (cmd_tx, mut events, handle) = spawn_runner(backend);

    tokio::time::sleep(Duration::from_millis(59_500)).await;
    cmd_tx
        .send(AttemptCommand::SelectOption {
            question_id: QuestionId(11),
            option_id: OptionId(2),
        })
        .await
        .expect("select");
    cmd_tx.send(AttemptCommand::Submit).await.expect("submit");

    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Submitted);
    assert_eq!(
        controller.result().map(|result| result.trigger),
        Some(SubmitTrigger::Manual)
    );
    let submissions = submissions.lock().await;
    assert_eq!(submissions.len(), 1, "exactly one submission");
    assert_eq!(
        submissions[0].answers[0].selected_option_id,
        Some(OptionId(2))
    );

    let events = drain(&mut events);
    assert!(!events.iter().any(|event| matches!(
        event,
        AttemptEvent::Submitting {
            trigger: SubmitTrigger::Timeout
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn failed_submission_returns_to_active_and_retry_succeeds() {
    let backend = Arc::new(TestBackend::new(one_question_exam(Some(10))).failing_submits(1));
    let submissions = Arc::clone(&backend.submissions);
    let (cmd_tx, mut events, handle) = spawn_runner(backend);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    cmd_tx.send(AttemptCommand::Submit).await.expect("submit");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let so_far = drain(&mut events);
    assert!(so_far
        .iter()
        .any(|event| matches!(event, AttemptEvent::SubmitFailed(_))));

    cmd_tx
        .send(AttemptCommand::SelectOption {
            question_id: QuestionId(11),
            option_id: OptionId(1),
        })
        .await
        .expect("edit after failure");
    cmd_tx.send(AttemptCommand::Submit).await.expect("retry");

    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Submitted);
    let submissions = submissions.lock().await;
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].answers[0].selected_option_id, None);
    assert_eq!(
        submissions[1].answers[0].selected_option_id,
        Some(OptionId(1))
    );
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        AttemptEvent::AnswerRecorded {
            question_id: QuestionId(11),
            answer: Answer::Choice(OptionId(1)),
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn submission_outcome_survives_a_full_event_queue() {
    let backend = Arc::new(TestBackend::new(one_question_exam(None)));
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, mut events) = mpsc::channel(1);
    let handle = tokio::spawn(AttemptRunner::new(backend, ExamId(1), UserId(2), event_tx).run(cmd_rx));

    assert!(matches!(events.recv().await, Some(AttemptEvent::Loaded { .. })));
    cmd_tx
        .send(AttemptCommand::SelectOption {
            question_id: QuestionId(11),
            option_id: OptionId(2),
        })
        .await
        .expect("select");
    cmd_tx.send(AttemptCommand::Submit).await.expect("submit");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }
    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Submitted);
    assert!(matches!(
        received.last(),
        Some(AttemptEvent::Submitted(AttemptResult {
            trigger: SubmitTrigger::Manual,
            ..
        }))
    ));
}

#[tokio::test(start_paused = true)]
async fn closing_the_view_stops_the_clock_and_drops_late_results() {
    let backend = Arc::new(
        TestBackend::new(one_question_exam(Some(1))).slow_submit(Duration::from_secs(30)),
    );
    let (cmd_tx, mut events, handle) = spawn_runner(backend);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    cmd_tx.send(AttemptCommand::Submit).await.expect("submit");
    tokio::time::sleep(Duration::from_millis(100)).await;
    cmd_tx.send(AttemptCommand::Close).await.expect("close");

    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Submitting);
    assert_eq!(controller.remaining_seconds(), Some(58));

    tokio::time::sleep(Duration::from_secs(60)).await;
    let events = drain(&mut events);
    assert!(!events
        .iter()
        .any(|event| matches!(event, AttemptEvent::Submitted(_))));
}

#[tokio::test(start_paused = true)]
async fn edits_after_submission_are_rejected() {
    let backend = Arc::new(
        TestBackend::new(one_question_exam(None)).slow_submit(Duration::from_secs(2)),
    );
    let (cmd_tx, mut events, handle) = spawn_runner(backend);

    tokio::time::sleep(Duration::from_millis(10)).await;
    cmd_tx.send(AttemptCommand::Submit).await.expect("submit");
    cmd_tx.send(AttemptCommand::Submit).await.expect("double click");
    cmd_tx
        .send(AttemptCommand::SelectOption {
            question_id: QuestionId(11),
            option_id: OptionId(1),
        })
        .await
        .expect("late edit");

    let controller = handle.await.expect("runner task");
    assert_eq!(controller.phase(), AttemptPhase::Submitted);
    assert!(controller
        .attempt()
        .expect("attempt")
        .answers
        .is_empty());

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        AttemptEvent::SubmitRejected(AttemptError::AlreadySubmitted)
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        AttemptEvent::AnswerRejected {
            reason: AttemptError::ReadOnly(AttemptPhase::Submitting),
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn closing_during_load_never_starts_the_clock() {
    let backend = Arc::new(TestBackend::new(one_question_exam(Some(1))));
    let start_calls = Arc::clone(&backend.start_calls);
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (event_tx, mut events) = mpsc::channel(16);
    cmd_tx.send(AttemptCommand::Close).await.expect("close");

    let runner = AttemptRunner::new(backend, ExamId(1), UserId(2), event_tx);
    let controller = runner.run(cmd_rx).await;

    // Loading and closing race; either the view closed mid-load or the exam
    // loaded and was closed right away. The clock never ran.
    assert!(matches!(
        controller.phase(),
        AttemptPhase::Loading | AttemptPhase::Active
    ));
    assert!(*start_calls.lock().await <= 1);
    assert!(!drain(&mut events)
        .iter()
        .any(|event| matches!(event, AttemptEvent::Tick { .. })));
}
