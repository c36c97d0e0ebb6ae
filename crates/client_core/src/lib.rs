use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        AttemptId, Exam, ExamId, ExamSummary, ExamWithKey, OptionId, QuestionId, Role, UserId,
    },
    error::ApiError,
    protocol::{
        AttemptDetail, AttemptSummary, AuthResponse, CreateExamRequest, CreateExamResponse,
        DeleteExamRequest, DraftQuestion, ExamDraft, GradeEssayRequest, GradeEssayResponse,
        LoginRequest, MessageResponse, ParsePdfResponse, RegisterRequest, StartExamRequest,
        StartExamResponse, SubmitExamRequest, SubmitExamResponse, UpdateAnswerRequest, UserQuery,
    },
};
use tracing::{debug, info, warn};
use url::Url;

pub mod attempt;
pub mod authoring;
pub mod error;
pub mod runner;
pub mod session;

pub use attempt::{AttemptController, AttemptPhase, SubmitGate, SubmitTrigger};
pub use error::{ClientError, ErrorCategory, ValidationError};
pub use runner::{AttemptCommand, AttemptEvent, AttemptRunner};
pub use session::{Session, SessionContext, SessionStore};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The three backend calls an exam attempt depends on.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<Exam, ClientError>;
    async fn start_attempt(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<AttemptId, ClientError>;
    async fn submit_attempt(
        &self,
        exam_id: ExamId,
        request: &SubmitExamRequest,
    ) -> Result<SubmitExamResponse, ClientError>;
}

/// Validates and normalizes the API base URL (no trailing slash).
pub fn normalize_api_url(raw: &str) -> Result<String, url::ParseError> {
    let parsed = Url::parse(raw.trim())?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// REST client for the exam backend. Authenticated calls carry the bearer
/// token of the current session.
#[derive(Clone)]
pub struct ExamClient {
    http: Client,
    api_url: String,
    token: Option<String>,
}

impl ExamClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(api_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http_client(http, api_url))
    }

    pub fn with_http_client(http: Client, api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Client carrying the bearer token of `session`, if any.
    pub fn for_session(
        api_url: impl Into<String>,
        timeout: Duration,
        session: &SessionContext,
    ) -> Result<Self, ClientError> {
        let mut client = Self::with_timeout(api_url, timeout)?;
        client.set_token(session.token().map(str::to_string));
        Ok(client)
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = ensure_success(self.authorized(builder).send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| ClientError::Decode(err.to_string()))
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let response: AuthResponse = self
            .send_json(self.http.post(self.url("auth/login")).json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            }))
            .await?;
        info!(user_id = response.user.id.0, role = %response.user.role, "auth: logged in");
        self.token = Some(response.token.clone());
        Ok(response)
    }

    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> Result<AuthResponse, ClientError> {
        let response: AuthResponse = self
            .send_json(self.http.post(self.url("auth/register")).json(&RegisterRequest {
                username: username.to_string(),
                password: password.to_string(),
                full_name: full_name.to_string(),
                role,
            }))
            .await?;
        info!(user_id = response.user.id.0, role = %response.user.role, "auth: registered");
        self.token = Some(response.token.clone());
        Ok(response)
    }

    pub async fn list_exams(&self) -> Result<Vec<ExamSummary>, ClientError> {
        self.send_json(self.http.get(self.url("exams"))).await
    }

    pub async fn get_exam(&self, exam_id: ExamId) -> Result<Exam, ClientError> {
        debug!(exam_id = exam_id.0, "exam: fetching definition");
        self.send_json(self.http.get(self.url(&format!("exams/{exam_id}"))))
            .await
    }

    pub async fn start_exam(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<StartExamResponse, ClientError> {
        let response: StartExamResponse = self
            .send_json(
                self.http
                    .post(self.url(&format!("exams/{exam_id}/start")))
                    .json(&StartExamRequest { user_id }),
            )
            .await?;
        info!(
            exam_id = exam_id.0,
            user_id = user_id.0,
            attempt_id = response.attempt_id.0,
            "exam: attempt opened"
        );
        Ok(response)
    }

    pub async fn submit_exam(
        &self,
        exam_id: ExamId,
        request: &SubmitExamRequest,
    ) -> Result<SubmitExamResponse, ClientError> {
        let response: SubmitExamResponse = self
            .send_json(
                self.http
                    .post(self.url(&format!("exams/{exam_id}/submit")))
                    .json(request),
            )
            .await?;
        info!(
            exam_id = exam_id.0,
            attempt_id = request.attempt_id.0,
            answers = request.answers.len(),
            total_score = response.total_score,
            "exam: attempt submitted"
        );
        Ok(response)
    }

    pub async fn my_created_exams(&self, user_id: UserId) -> Result<Vec<ExamSummary>, ClientError> {
        self.send_json(
            self.http
                .get(self.url("exams/my-created"))
                .query(&UserQuery { user_id }),
        )
        .await
    }

    pub async fn my_attempts(&self, user_id: UserId) -> Result<Vec<AttemptSummary>, ClientError> {
        self.send_json(
            self.http
                .get(self.url("exams/my-attempts"))
                .query(&UserQuery { user_id }),
        )
        .await
    }

    pub async fn exam_detail_with_answers(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<ExamWithKey, ClientError> {
        self.send_json(
            self.http
                .get(self.url(&format!("exams/{exam_id}/detail")))
                .query(&UserQuery { user_id }),
        )
        .await
    }

    pub async fn exam_attempts(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<Vec<AttemptSummary>, ClientError> {
        self.send_json(
            self.http
                .get(self.url(&format!("exams/{exam_id}/attempts")))
                .query(&UserQuery { user_id }),
        )
        .await
    }

    /// Answer key and attempt listing for the exam owner, fetched together.
    pub async fn exam_overview(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<(ExamWithKey, Vec<AttemptSummary>), ClientError> {
        futures::try_join!(
            self.exam_detail_with_answers(exam_id, user_id),
            self.exam_attempts(exam_id, user_id)
        )
    }

    pub async fn grade_essay(
        &self,
        attempt_id: AttemptId,
        question_id: QuestionId,
        score: f64,
        teacher_id: UserId,
    ) -> Result<GradeEssayResponse, ClientError> {
        let response: GradeEssayResponse = self
            .send_json(
                self.http
                    .post(self.url(&format!("exams/attempts/{attempt_id}/grade")))
                    .json(&GradeEssayRequest {
                        question_id,
                        score,
                        teacher_id,
                    }),
            )
            .await?;
        info!(
            attempt_id = attempt_id.0,
            question_id = question_id.0,
            score,
            "grading: essay score recorded"
        );
        Ok(response)
    }

    pub async fn update_answer(
        &self,
        exam_id: ExamId,
        question_id: QuestionId,
        correct_option_id: OptionId,
        user_id: UserId,
    ) -> Result<MessageResponse, ClientError> {
        let response: MessageResponse = self
            .send_json(
                self.http
                    .post(self.url(&format!("exams/{exam_id}/update-answer")))
                    .json(&UpdateAnswerRequest {
                        question_id,
                        correct_option_id,
                        user_id,
                    }),
            )
            .await?;
        info!(
            exam_id = exam_id.0,
            question_id = question_id.0,
            correct_option_id = correct_option_id.0,
            "grading: answer key updated"
        );
        Ok(response)
    }

    pub async fn attempt_detail(
        &self,
        attempt_id: AttemptId,
        user_id: UserId,
    ) -> Result<AttemptDetail, ClientError> {
        self.send_json(
            self.http
                .get(self.url(&format!("exams/attempts/{attempt_id}")))
                .query(&UserQuery { user_id }),
        )
        .await
    }

    /// Finds the caller's attempt at `exam_id` and loads its graded detail.
    pub async fn review_attempt(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<AttemptDetail, ClientError> {
        let attempts = self.my_attempts(user_id).await?;
        let Some(attempt) = attempts
            .iter()
            .find(|attempt| attempt.exam_id == Some(exam_id))
        else {
            return Err(ClientError::NotFound(format!(
                "no attempt of exam {exam_id} for this account"
            )));
        };
        self.attempt_detail(attempt.attempt_id, user_id).await
    }

    pub async fn delete_exam(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<MessageResponse, ClientError> {
        let response: MessageResponse = self
            .send_json(
                self.http
                    .delete(self.url(&format!("exams/{exam_id}")))
                    .json(&DeleteExamRequest { user_id }),
            )
            .await?;
        warn!(exam_id = exam_id.0, user_id = user_id.0, "exam: deleted");
        Ok(response)
    }

    /// Validates the draft locally before posting it.
    pub async fn create_exam(
        &self,
        draft: &ExamDraft,
        created_by: UserId,
    ) -> Result<CreateExamResponse, ClientError> {
        authoring::validate_draft(draft)?;
        let response: CreateExamResponse = self
            .send_json(
                self.http
                    .post(self.url("exams/create"))
                    .json(&CreateExamRequest { draft, created_by }),
            )
            .await?;
        info!(
            created_by = created_by.0,
            questions = draft.questions.len(),
            exam_id = response.exam_id.map(|id| id.0),
            "exam: created"
        );
        Ok(response)
    }

    /// Uploads a PDF for the backend to turn into draft questions.
    pub async fn parse_pdf(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<DraftQuestion>, ClientError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = multipart::Form::new().part("file", part);
        let response: ParsePdfResponse = self
            .send_json(self.http.post(self.url("exams/parse-pdf")).multipart(form))
            .await?;
        if response.questions.is_empty() {
            return Err(ValidationError::EmptyPdf.into());
        }
        info!(
            file_name,
            questions = response.questions.len(),
            "authoring: parsed questions from pdf"
        );
        Ok(response.questions)
    }
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let err = ApiError::from_response(status.as_u16(), &body);
    warn!(%url, status = status.as_u16(), message = %err.message, "backend request failed");
    Err(err.into())
}

#[async_trait]
impl ExamBackend for ExamClient {
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<Exam, ClientError> {
        self.get_exam(exam_id).await
    }

    async fn start_attempt(
        &self,
        exam_id: ExamId,
        user_id: UserId,
    ) -> Result<AttemptId, ClientError> {
        Ok(self.start_exam(exam_id, user_id).await?.attempt_id)
    }

    async fn submit_attempt(
        &self,
        exam_id: ExamId,
        request: &SubmitExamRequest,
    ) -> Result<SubmitExamResponse, ClientError> {
        self.submit_exam(exam_id, request).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
