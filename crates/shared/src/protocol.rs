use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    lenient_timestamp, AttemptId, ExamId, ExamOption, OptionId, Question, QuestionId,
    QuestionType, Role, User, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UserQuery {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartExamRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartExamResponse {
    pub attempt_id: AttemptId,
}

/// One submitted answer. Exactly one record is sent per question; a field the
/// student never filled in is left out of the JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option_id: Option<OptionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essay_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitExamRequest {
    pub attempt_id: AttemptId,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitExamResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub total_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GradeEssayRequest {
    pub question_id: QuestionId,
    pub score: f64,
    pub teacher_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeEssayResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub total_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdateAnswerRequest {
    pub question_id: QuestionId,
    pub correct_option_id: OptionId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeleteExamRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Answer as stored by the backend, with the score it assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub question_id: QuestionId,
    #[serde(default)]
    pub selected_option_id: Option<OptionId>,
    #[serde(default)]
    pub essay_answer: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_id: AttemptId,
    #[serde(default)]
    pub exam_id: Option<ExamId>,
    #[serde(default)]
    pub exam_title: Option<String>,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<GradedAnswer>,
}

impl AttemptSummary {
    pub fn answer_for(&self, question_id: QuestionId) -> Option<&GradedAnswer> {
        self.answers
            .iter()
            .find(|answer| answer.question_id == question_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptDetail {
    #[serde(default)]
    pub attempt_id: Option<AttemptId>,
    #[serde(default)]
    pub exam_title: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default)]
    pub questions: Vec<Question<ExamOption>>,
    #[serde(default)]
    pub answers: Vec<GradedAnswer>,
}

impl AttemptDetail {
    pub fn answer_for(&self, question_id: QuestionId) -> Option<&GradedAnswer> {
        self.answers
            .iter()
            .find(|answer| answer.question_id == question_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOption {
    pub content: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftQuestion {
    pub content: String,
    #[serde(default = "default_question_score")]
    pub score: f64,
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<DraftOption>,
}

fn default_question_score() -> f64 {
    1.0
}

/// Exam as authored by a teacher before the backend assigns ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_exam_duration")]
    pub duration: u32,
    #[serde(default)]
    pub questions: Vec<DraftQuestion>,
}

fn default_exam_duration() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateExamRequest<'a> {
    #[serde(flatten)]
    pub draft: &'a ExamDraft,
    pub created_by: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateExamResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "id")]
    pub exam_id: Option<ExamId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsePdfResponse {
    #[serde(default)]
    pub questions: Vec<DraftQuestion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_record_omits_unfilled_fields() {
        let record = AnswerRecord {
            question_id: QuestionId(4),
            selected_option_id: None,
            essay_answer: None,
        };
        assert_eq!(
            serde_json::to_value(&record).expect("json"),
            serde_json::json!({"question_id": 4})
        );
    }

    #[test]
    fn create_request_flattens_draft() {
        let draft = ExamDraft {
            title: "Quiz".to_string(),
            description: String::new(),
            duration: 15,
            questions: vec![DraftQuestion {
                content: "Essay".to_string(),
                score: 2.0,
                question_type: QuestionType::Essay,
                options: Vec::new(),
            }],
        };
        let value = serde_json::to_value(CreateExamRequest {
            draft: &draft,
            created_by: UserId(9),
        })
        .expect("json");
        assert_eq!(value["title"], "Quiz");
        assert_eq!(value["duration"], 15);
        assert_eq!(value["created_by"], 9);
        assert_eq!(value["questions"][0]["question_type"], "essay");
    }

    #[test]
    fn attempt_summary_tolerates_sparse_rows() {
        let summary: AttemptSummary = serde_json::from_value(serde_json::json!({
            "attempt_id": 12,
            "total_score": null,
            "start_time": "2024-03-02T09:00:00"
        }))
        .expect("summary");
        assert_eq!(summary.attempt_id, AttemptId(12));
        assert!(summary.total_score.is_none());
        assert!(summary.start_time.is_some());
        assert!(summary.answers.is_empty());
    }
}
