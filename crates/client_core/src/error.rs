use shared::{
    domain::{OptionId, QuestionId},
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

/// User-facing buckets every failure is sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Forbidden,
    Validation,
    Network,
}

/// Local input problems, reported before any request is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("enter an exam code")]
    MissingExamCode,
    #[error("invalid exam code '{0}'")]
    InvalidExamCode(String),
    #[error("exam title is required")]
    MissingTitle,
    #[error("an exam needs at least one question")]
    NoQuestions,
    #[error("question {0} has no content")]
    EmptyQuestion(usize),
    #[error("question {0} (multiple choice) needs at least 2 options")]
    TooFewOptions(usize),
    #[error("question {question}: option {option} is empty")]
    EmptyOption { question: usize, option: usize },
    #[error("question {0}: no correct option selected")]
    NoCorrectOption(usize),
    #[error("question {0} is not part of this exam")]
    UnknownQuestion(QuestionId),
    #[error("question {0} is not a multiple-choice question")]
    NotMultipleChoice(QuestionId),
    #[error("question {0} is not an essay question")]
    NotEssay(QuestionId),
    #[error("option {option} does not belong to question {question}")]
    ForeignOption {
        question: QuestionId,
        option: OptionId,
    },
    #[error("score {score} must be between 0 and {max}")]
    ScoreOutOfRange { score: f64, max: f64 },
    #[error("no questions could be read from the PDF")]
    EmptyPdf,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("backend rejected request: {0}")]
    Api(#[from] ApiError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api(err) => match err.code {
                ErrorCode::NotFound => ErrorCategory::NotFound,
                ErrorCode::Unauthorized | ErrorCode::Forbidden => ErrorCategory::Forbidden,
                ErrorCode::Validation => ErrorCategory::Validation,
                ErrorCode::RateLimited | ErrorCode::Internal => ErrorCategory::Network,
            },
            Self::Validation(_) => ErrorCategory::Validation,
            Self::NotLoggedIn | Self::Forbidden(_) => ErrorCategory::Forbidden,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Transport(_) | Self::Decode(_) => ErrorCategory::Network,
        }
    }

    /// True when the stored credential is missing or was refused.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::NotLoggedIn)
            || matches!(self, Self::Api(err) if err.code == ErrorCode::Unauthorized)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => Some(err.status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Message suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(err) => match &err.hint {
                Some(hint) => format!("{} (hint: {hint})", err.message),
                None => err.message.clone(),
            },
            Self::Transport(err) if err.is_timeout() => {
                "The server took too long to respond; please retry.".to_string()
            }
            Self::Transport(err) if err.is_connect() => {
                "Server unreachable; check the API URL and your network.".to_string()
            }
            Self::NotLoggedIn => "You are not logged in; run `login` first.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_backend_statuses() {
        let cases = [
            (404, ErrorCategory::NotFound),
            (403, ErrorCategory::Forbidden),
            (401, ErrorCategory::Forbidden),
            (400, ErrorCategory::Validation),
            (500, ErrorCategory::Network),
        ];
        for (status, expected) in cases {
            let err = ClientError::from(ApiError::new(status, "boom"));
            assert_eq!(err.category(), expected, "status {status}");
        }
    }

    #[test]
    fn only_unauthorized_requires_reauth() {
        assert!(ClientError::from(ApiError::new(401, "expired")).requires_reauth());
        assert!(ClientError::NotLoggedIn.requires_reauth());
        assert!(!ClientError::from(ApiError::new(403, "closed")).requires_reauth());
    }

    #[test]
    fn local_validation_is_its_own_category() {
        let err = ClientError::from(ValidationError::InvalidExamCode("abc".to_string()));
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.user_message(), "invalid exam code 'abc'");
    }

    #[test]
    fn user_message_carries_backend_hint() {
        let mut api = ApiError::new(400, "cannot parse PDF");
        api.hint = Some("export as text PDF".to_string());
        assert_eq!(
            ClientError::from(api).user_message(),
            "cannot parse PDF (hint: export as text PDF)"
        );
    }
}
