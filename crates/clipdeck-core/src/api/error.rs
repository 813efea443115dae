use std::fmt;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(ErrorMessage),

    #[error("Access denied: {0}")]
    AccessDenied(ErrorMessage),

    #[error("Resource not found: {0}")]
    NotFound(ErrorMessage),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: ErrorMessage },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: ErrorMessage },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// FastAPI-style error body: `{"detail": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Text of an error response.
///
/// Keeps the backend's `detail` apart from a raw body so that only text the
/// backend meant for the user is ever shown as its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorMessage {
    /// The `detail` field of a FastAPI error body
    Detail(String),
    /// Raw (possibly truncated) response body, when there was no `detail`
    Body(String),
}

impl ErrorMessage {
    fn from_body(body: &str) -> Self {
        match ApiError::detail_from_body(body) {
            Some(detail) => ErrorMessage::Detail(detail),
            None => ErrorMessage::Body(ApiError::truncate_body(body)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorMessage::Detail(s) | ErrorMessage::Body(s) => s.as_str(),
        }
    }

    /// The backend's `detail`, if the response carried a non-empty one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ErrorMessage::Detail(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
    }

    /// Extract the backend's `detail` message from an error body, if it has one.
    ///
    /// String details are returned verbatim. Structured details (validation
    /// error lists) are returned as compact JSON. A `null` detail counts as
    /// absent.
    pub fn detail_from_body(body: &str) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        match parsed.detail {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = ErrorMessage::from_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            code @ 500..=599 => ApiError::ServerError {
                status: code,
                message,
            },
            code => ApiError::Http {
                status: code,
                message,
            },
        }
    }

    /// HTTP status carried by this error, when the backend produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::AccessDenied(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::ServerError { status, .. } | ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse(_) | ApiError::InvalidRequest(_) => None,
        }
    }

    /// The backend's `detail` message, when the error response carried one.
    /// Raw bodies without a `detail` are never returned here.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized(m)
            | ApiError::AccessDenied(m)
            | ApiError::NotFound(m)
            | ApiError::ServerError { message: m, .. }
            | ApiError::Http { message: m, .. } => m.detail(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}
