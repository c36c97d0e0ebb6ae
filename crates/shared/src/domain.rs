use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ExamId);
id_newtype!(QuestionId);
id_newtype!(OptionId);
id_newtype!(AttemptId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Teacher => f.write_str("teacher"),
            Role::Student => f.write_str("student"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: Role,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "mcq")]
    MultipleChoice,
    #[serde(rename = "essay")]
    Essay,
}

/// Read access shared by the student-facing and answer-key option shapes.
pub trait ChoiceOption {
    fn id(&self) -> OptionId;
    fn content(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamOption {
    pub id: OptionId,
    pub content: String,
}

impl ChoiceOption for ExamOption {
    fn id(&self) -> OptionId {
        self.id
    }

    fn content(&self) -> &str {
        &self.content
    }
}

/// Option as seen by the exam owner, including correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedOption {
    pub id: OptionId,
    pub content: String,
    #[serde(default)]
    pub is_correct: bool,
}

impl ChoiceOption for KeyedOption {
    fn id(&self) -> OptionId {
        self.id
    }

    fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "O: Deserialize<'de>"))]
pub struct Question<O = ExamOption> {
    pub id: QuestionId,
    pub content: String,
    pub question_type: QuestionType,
    pub score: f64,
    #[serde(default)]
    pub options: Vec<O>,
}

impl<O: ChoiceOption> Question<O> {
    pub fn is_essay(&self) -> bool {
        self.question_type == QuestionType::Essay
    }

    pub fn option(&self, option_id: OptionId) -> Option<&O> {
        self.options.iter().find(|option| option.id() == option_id)
    }

    pub fn has_option(&self, option_id: OptionId) -> bool {
        self.option(option_id).is_some()
    }
}

impl Question<KeyedOption> {
    pub fn correct_option(&self) -> Option<&KeyedOption> {
        self.options.iter().find(|option| option.is_correct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "O: Deserialize<'de>"))]
pub struct Exam<O = ExamOption> {
    pub id: ExamId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minutes allowed for an attempt.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    pub questions: Vec<Question<O>>,
}

/// Exam with correctness data, served to its owner only.
pub type ExamWithKey = Exam<KeyedOption>;

impl<O: ChoiceOption> Exam<O> {
    /// Seconds on the attempt clock. A missing or zero duration means untimed.
    pub fn countdown_seconds(&self) -> Option<u32> {
        self.duration
            .filter(|minutes| *minutes > 0)
            .map(|minutes| minutes.saturating_mul(60))
    }

    pub fn question(&self, question_id: QuestionId) -> Option<&Question<O>> {
        self.questions
            .iter()
            .find(|question| question.id == question_id)
    }

    pub fn has_essay(&self) -> bool {
        self.questions.iter().any(Question::is_essay)
    }

    pub fn max_score(&self) -> f64 {
        self.questions.iter().map(|question| question.score).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: ExamId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Choice(OptionId),
    Essay(String),
}

/// One exam attempt as held by the client while it is being taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub id: AttemptId,
    pub exam_id: ExamId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub terminal: bool,
    pub total_score: Option<f64>,
    pub answers: HashMap<QuestionId, Answer>,
}

impl Attempt {
    pub fn open(
        id: AttemptId,
        exam_id: ExamId,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            exam_id,
            user_id,
            started_at,
            terminal: false,
            total_score: None,
            answers: HashMap::new(),
        }
    }

    pub fn answer(&self, question_id: QuestionId) -> Option<&Answer> {
        self.answers.get(&question_id)
    }

    pub fn selected_option(&self, question_id: QuestionId) -> Option<OptionId> {
        match self.answers.get(&question_id) {
            Some(Answer::Choice(option_id)) => Some(*option_id),
            _ => None,
        }
    }

    pub fn essay_text(&self, question_id: QuestionId) -> Option<&str> {
        match self.answers.get(&question_id) {
            Some(Answer::Essay(text)) => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Accepts RFC 3339 as well as the naive `YYYY-MM-DDTHH:MM:SS[.fff]` form,
/// which is read as UTC.
pub mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam_json(duration: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": 7,
            "title": "Algebra",
            "duration": duration,
            "questions": [
                {
                    "id": 1,
                    "content": "2 + 2?",
                    "question_type": "mcq",
                    "score": 1.0,
                    "options": [{"id": 10, "content": "3"}, {"id": 11, "content": "4"}]
                },
                {
                    "id": 2,
                    "content": "Explain",
                    "question_type": "essay",
                    "score": 4
                }
            ]
        })
    }

    #[test]
    fn decodes_backend_exam_shape() {
        let exam: Exam = serde_json::from_value(exam_json(serde_json::json!(15))).expect("exam");
        assert_eq!(exam.id, ExamId(7));
        assert_eq!(exam.countdown_seconds(), Some(900));
        assert!(exam.has_essay());
        assert_eq!(exam.max_score(), 5.0);
        assert!(exam.questions[1].options.is_empty());
        assert!(exam.questions[0].has_option(OptionId(11)));
        assert!(!exam.questions[0].has_option(OptionId(99)));
    }

    #[test]
    fn zero_or_missing_duration_is_untimed() {
        let zero: Exam = serde_json::from_value(exam_json(serde_json::json!(0))).expect("exam");
        let null: Exam =
            serde_json::from_value(exam_json(serde_json::Value::Null)).expect("exam");
        assert_eq!(zero.countdown_seconds(), None);
        assert_eq!(null.countdown_seconds(), None);
    }

    #[test]
    fn keyed_question_exposes_correct_option() {
        let question: Question<KeyedOption> = serde_json::from_value(serde_json::json!({
            "id": 3,
            "content": "Capital of France?",
            "question_type": "mcq",
            "score": 2,
            "options": [
                {"id": 1, "content": "Lyon", "is_correct": false},
                {"id": 2, "content": "Paris", "is_correct": true}
            ]
        }))
        .expect("question");
        assert_eq!(question.correct_option().map(|o| o.id), Some(OptionId(2)));
    }

    #[test]
    fn keyed_exam_decodes_without_option_lists() {
        let exam: ExamWithKey = serde_json::from_value(serde_json::json!({
            "id": 9,
            "title": "Essays only",
            "questions": [
                {"id": 1, "content": "Discuss", "question_type": "essay", "score": 5}
            ]
        }))
        .expect("keyed exam");
        assert!(exam.questions[0].options.is_empty());
        assert_eq!(exam.countdown_seconds(), None);
    }

    #[test]
    fn lenient_timestamp_accepts_naive_and_rfc3339() {
        let naive = lenient_timestamp::parse("2024-05-01T08:30:00").expect("naive");
        let zoned = lenient_timestamp::parse("2024-05-01T10:30:00+02:00").expect("zoned");
        let spaced = lenient_timestamp::parse("2024-05-01 08:30:00.250").expect("spaced");
        assert_eq!(naive, zoned);
        assert_eq!(spaced.timestamp(), naive.timestamp());
        assert!(lenient_timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut user = User {
            id: UserId(1),
            username: "minh".to_string(),
            full_name: Some("  ".to_string()),
            role: Role::Student,
        };
        assert_eq!(user.display_name(), "minh");
        user.full_name = Some("Tran Minh".to_string());
        assert_eq!(user.display_name(), "Tran Minh");
    }
}
