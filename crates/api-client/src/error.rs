//! Failure classification and the error type surfaced to callers.
//!
//! Every failed HTTP attempt is captured as a [`FailedAttempt`], classified
//! into exactly one [`ErrorKind`] by [`classify`], and turned into a
//! displayable string by [`user_message`]. Callers only ever see [`ApiError`].

use serde::Serialize;
use serde_json::Value;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

pub(crate) const NETWORK_MESSAGE: &str =
    "Unable to connect to the server. Please check your internet connection.";
pub(crate) const UNAUTHORIZED_MESSAGE: &str = "Your session has expired. Please log in again.";
pub(crate) const FORBIDDEN_MESSAGE: &str = "You do not have permission to perform this action.";
pub(crate) const NOT_FOUND_MESSAGE: &str = "The requested resource was not found.";
pub(crate) const VALIDATION_MESSAGE: &str = "Please check your input and try again.";
pub(crate) const SERVER_MESSAGE: &str = "A server error occurred. Please try again later.";
pub(crate) const TIMEOUT_MESSAGE: &str = "The request timed out. Please try again.";
pub(crate) const FALLBACK_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Closed taxonomy of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No response was received.
    #[error("network error")]
    NetworkError,
    /// HTTP 401.
    #[error("unauthorized")]
    Unauthorized,
    /// HTTP 403.
    #[error("forbidden")]
    Forbidden,
    /// HTTP 404.
    #[error("not found")]
    NotFound,
    /// HTTP 400 or 422.
    #[error("validation error")]
    ValidationError,
    /// HTTP 500, 502, 503 or 504.
    #[error("server error")]
    ServerError,
    /// The transport deadline elapsed before a response arrived.
    #[error("timeout")]
    Timeout,
    /// Anything else.
    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Wire name of the kind, e.g. `NETWORK_ERROR`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// One failed HTTP attempt, either with or without a response.
#[derive(Debug)]
pub struct FailedAttempt {
    status: Option<u16>,
    timed_out: bool,
    data: Option<Value>,
    detail: String,
    source: Option<reqwest::Error>,
}

impl FailedAttempt {
    /// An attempt whose connection never produced a response.
    pub fn no_response(timed_out: bool, detail: impl Into<String>) -> Self {
        Self {
            status: None,
            timed_out,
            data: None,
            detail: detail.into(),
            source: None,
        }
    }

    /// An attempt that received a non-success status, with its decoded body if any.
    pub fn with_status(status: u16, data: Option<Value>) -> Self {
        Self {
            status: Some(status),
            timed_out: false,
            data,
            detail: format!("Request failed with status code {}", status),
            source: None,
        }
    }

    /// A transport failure reported before any status was read.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        Self {
            status: None,
            timed_out: err.is_timeout(),
            data: None,
            detail: err.to_string(),
            source: Some(err),
        }
    }

    /// HTTP status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Whether any response was received.
    pub fn has_response(&self) -> bool {
        self.status.is_some()
    }

    /// Whether the transport aborted the attempt on its deadline.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Decoded JSON body of the failed response.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Low-level description of the failure.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Classify a failed attempt. First match wins.
pub fn classify(attempt: &FailedAttempt) -> ErrorKind {
    let Some(status) = attempt.status else {
        return if attempt.timed_out {
            ErrorKind::Timeout
        } else {
            ErrorKind::NetworkError
        };
    };

    match status {
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        400 | 422 => ErrorKind::ValidationError,
        500 | 502 | 503 | 504 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

/// Human-readable message for a failed attempt. Never panics; missing
/// payload fields fall back to the fixed message for the kind.
pub fn user_message(attempt: &FailedAttempt) -> String {
    match classify(attempt) {
        ErrorKind::NetworkError => NETWORK_MESSAGE.to_string(),
        ErrorKind::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
        ErrorKind::Forbidden => FORBIDDEN_MESSAGE.to_string(),
        ErrorKind::NotFound => NOT_FOUND_MESSAGE.to_string(),
        ErrorKind::ValidationError => validation_message(attempt.data()),
        ErrorKind::ServerError => SERVER_MESSAGE.to_string(),
        ErrorKind::Timeout => TIMEOUT_MESSAGE.to_string(),
        ErrorKind::Unknown => attempt
            .data()
            .and_then(|data| {
                string_field(data, "message")
                    .or_else(|| string_field(data, "detail"))
                    .or_else(|| string_field(data, "title"))
            })
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
    }
}

fn validation_message(data: Option<&Value>) -> String {
    let Some(data) = data else {
        return VALIDATION_MESSAGE.to_string();
    };

    if let Some(message) = string_field(data, "message") {
        return message;
    }

    if let Some(Value::Object(errors)) = data.get("errors") {
        let flattened: Vec<&str> = errors
            .values()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                Value::String(message) => vec![message.as_str()],
                _ => Vec::new(),
            })
            .collect();

        if !flattened.is_empty() {
            return flattened.join(", ");
        }
    }

    VALIDATION_MESSAGE.to_string()
}

fn string_field(data: &Value, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The only error shape returned by the client.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    /// Classified kind.
    pub kind: ErrorKind,
    /// Displayable message.
    pub message: String,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
    /// Decoded server payload, if any.
    pub data: Option<Value>,
    /// Underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            data: None,
            source: None,
        }
    }

    /// Create a new error with the given kind, message and source.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(kind, message)
        }
    }

    /// Build the terminal error for a failed attempt.
    pub fn from_attempt(attempt: FailedAttempt) -> Self {
        let kind = classify(&attempt);
        let message = user_message(&attempt);
        let source: Box<dyn std::error::Error + Send + Sync> = match attempt.source {
            Some(err) => Box::new(err),
            None => attempt.detail.into(),
        };

        Self {
            kind,
            message,
            status: attempt.status,
            data: attempt.data,
            source: Some(source),
        }
    }

    /// Failure outside the HTTP exchange itself (body encoding or decoding).
    pub(crate) fn unexpected(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::with_source(ErrorKind::Unknown, FALLBACK_MESSAGE, source)
    }

    /// Returns true for expired or missing sessions.
    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    /// Returns true if the server rejected the request input.
    pub fn is_validation_error(&self) -> bool {
        self.kind == ErrorKind::ValidationError
    }
}

/// Displayable message for any error: the [`ApiError`] message when the
/// error is one, its own text otherwise, `fallback` when that text is empty.
pub fn message_for(err: &(dyn std::error::Error + 'static), fallback: &str) -> String {
    if let Some(api_error) = err.downcast_ref::<ApiError>() {
        return api_error.message.clone();
    }

    let text = err.to_string();
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
