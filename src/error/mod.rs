//! Centralized error handling for LexBridge
//!
//! [`EngineError`] is the typed failure taxonomy of the engagement engine.
//! [`ApiError`] is the HTTP-facing error with status code mapping and JSON
//! error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Duration;
use serde::Serialize;
use thiserror::Error;

/// Engine failure taxonomy.
///
/// Every variant except [`EngineError::Storage`] is detected before any write,
/// so a failed operation never leaves partial state behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Engagement already agreed at {agreed}, cannot accept {requested}")]
    ConflictingAgreement { agreed: i64, requested: i64 },

    #[error("Engagement is already {0}")]
    AlreadyTerminal(String),

    #[error("An activation request is already pending")]
    AlreadyPending,

    #[error("Activation cooldown active for another {} seconds", .remaining.num_seconds())]
    CooldownActive { remaining: Duration },

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Minimum withdrawal is {minimum}, requested {requested}")]
    BelowMinimumWithdrawal { minimum: i64, requested: i64 },

    #[error("{0} completed engagement(s) are missing meeting evidence")]
    EvidenceMissing(usize),

    #[error("Record was modified concurrently, retry the request")]
    ConcurrentModification,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn invalid_transition(from: impl std::fmt::Display, action: &str) -> Self {
        EngineError::InvalidTransition {
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    /// Only optimistic-lock conflicts may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Option<String>,
    },

    #[error("{message}")]
    UnprocessableEntity {
        code: &'static str,
        message: String,
        details: Option<String>,
    },

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict { code, .. } => code,
            ApiError::UnprocessableEntity { code, .. } => code,
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Conflict { details, .. } | ApiError::UnprocessableEntity { details, .. } => {
                details.clone()
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::NotFound(what) => ApiError::NotFound(what),
            EngineError::Forbidden(why) => ApiError::Forbidden(why),
            EngineError::Validation(why) => ApiError::ValidationError(why),
            EngineError::Storage(why) => ApiError::InternalError(why),
            EngineError::InvalidTransition { .. } => ApiError::Conflict {
                code: "INVALID_TRANSITION",
                message,
                details: None,
            },
            EngineError::ConflictingAgreement { agreed, .. } => ApiError::Conflict {
                code: "CONFLICTING_AGREEMENT",
                message,
                details: Some(format!("agreed_price={}", agreed)),
            },
            EngineError::AlreadyTerminal(_) => ApiError::Conflict {
                code: "ALREADY_TERMINAL",
                message,
                details: None,
            },
            EngineError::AlreadyPending => ApiError::Conflict {
                code: "ALREADY_PENDING",
                message,
                details: None,
            },
            EngineError::CooldownActive { remaining } => ApiError::Conflict {
                code: "COOLDOWN_ACTIVE",
                message,
                details: Some(format!("remaining_seconds={}", remaining.num_seconds())),
            },
            EngineError::ConcurrentModification => ApiError::Conflict {
                code: "CONCURRENT_MODIFICATION",
                message,
                details: Some("retryable".to_string()),
            },
            EngineError::InsufficientBalance { available, .. } => ApiError::UnprocessableEntity {
                code: "INSUFFICIENT_BALANCE",
                message,
                details: Some(format!("available={}", available)),
            },
            EngineError::BelowMinimumWithdrawal { minimum, .. } => {
                ApiError::UnprocessableEntity {
                    code: "BELOW_MINIMUM_WITHDRAWAL",
                    message,
                    details: Some(format!("minimum={}", minimum)),
                }
            }
            EngineError::EvidenceMissing(count) => ApiError::UnprocessableEntity {
                code: "EVIDENCE_MISSING",
                message,
                details: Some(format!("missing_count={}", count)),
            },
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;
