use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 409 | 422 => Self::Validation,
            429 => Self::RateLimited,
            _ => Self::Internal,
        }
    }
}

/// Error body returned by the exam backend: `{ "error": "...", "hint": "..." }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?} ({status}): {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub status: u16,
    pub message: String,
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_status(status),
            status,
            message: message.into(),
            hint: None,
        }
    }

    /// Builds an error from a non-success response. Bodies that are not the
    /// backend's JSON error shape are kept verbatim as the message.
    pub fn from_response(status: u16, raw_body: &str) -> Self {
        let body = serde_json::from_str::<ErrorBody>(raw_body).unwrap_or_default();
        let message = body
            .error
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                let trimmed = raw_body.trim();
                if trimmed.is_empty() || trimmed.starts_with('{') {
                    format!("request failed with status {status}")
                } else {
                    trimmed.to_string()
                }
            });
        Self {
            code: ErrorCode::from_status(status),
            status,
            message,
            hint: body.hint.filter(|hint| !hint.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        assert_eq!(ErrorCode::from_status(401), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(403), ErrorCode::Forbidden);
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(400), ErrorCode::Validation);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::Internal);
    }

    #[test]
    fn reads_backend_error_and_hint() {
        let err = ApiError::from_response(
            400,
            r#"{"error":"PDF has no questions","hint":"use numbered questions"}"#,
        );
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "PDF has no questions");
        assert_eq!(err.hint.as_deref(), Some("use numbered questions"));
    }

    #[test]
    fn falls_back_for_plain_and_empty_bodies() {
        assert_eq!(
            ApiError::from_response(502, "Bad Gateway").message,
            "Bad Gateway"
        );
        assert_eq!(
            ApiError::from_response(500, "").message,
            "request failed with status 500"
        );
        assert_eq!(
            ApiError::from_response(404, "{}").message,
            "request failed with status 404"
        );
    }
}
