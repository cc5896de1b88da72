//! External error taxonomy. Internal failures carry full detail into the logs;
//! only the generic code crosses the boundary.

use serde::Serialize;
use thiserror::Error;

/// Machine-readable codes surfaced to the transport boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION")]
    Validation,
    #[serde(rename = "LOGIN_FAILED")]
    LoginFailed,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "INVALID_TOKEN")]
    InvalidToken,
    #[serde(rename = "DEVICE_NOT_FOUND")]
    DeviceNotFound,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Error returned by every gate operation. The request-correlation id is
/// supplied by the transport boundary, not generated here.
#[derive(Debug, Error)]
#[error("{}: {message}", code.as_str())]
pub struct GateError {
    code: ErrorCode,
    message: String,
    retry_after_seconds: Option<i64>,
}

impl GateError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Generic credential failure. Never distinguishes unknown principals from
    /// wrong PINs in message or shape.
    #[must_use]
    pub fn login_failed() -> Self {
        Self {
            code: ErrorCode::LoginFailed,
            message: "Invalid credentials".to_string(),
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn rate_limited(retry_after_seconds: i64) -> Self {
        Self {
            code: ErrorCode::RateLimited,
            message: "Too many failed attempts".to_string(),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    /// Collapses expired/revoked/malformed/wrong-kind into one external shape.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self {
            code: ErrorCode::InvalidToken,
            message: "Invalid token".to_string(),
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn device_not_found() -> Self {
        Self {
            code: ErrorCode::DeviceNotFound,
            message: "Unknown device".to_string(),
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Conflict,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.retry_after_seconds
    }

    /// Callers may retry `INTERNAL_ERROR` and `CONFLICT`; nothing else.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ErrorCode::Internal | ErrorCode::Conflict)
    }
}
