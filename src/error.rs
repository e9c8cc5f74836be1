use axum::{http::StatusCode, Json};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Reasons a request can be rejected as invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    ContentEmpty,
    ContentTooLong,
    AlreadyDeleted,
    MessageDeleted,
    ClassNotStarted,
    ClassEnded,
    ClassOffline,
    Malformed,
}

impl ValidationKind {
    pub fn code(self) -> &'static str {
        match self {
            ValidationKind::ContentEmpty => "CONTENT_EMPTY",
            ValidationKind::ContentTooLong => "CONTENT_TOO_LONG",
            ValidationKind::AlreadyDeleted => "ALREADY_DELETED",
            ValidationKind::MessageDeleted => "MESSAGE_DELETED",
            ValidationKind::ClassNotStarted => "CLASS_NOT_STARTED",
            ValidationKind::ClassEnded => "CLASS_ENDED",
            ValidationKind::ClassOffline => "CLASS_OFFLINE",
            ValidationKind::Malformed => "MALFORMED_REQUEST",
        }
    }
}

/// Every failure the classroom core can report
#[derive(Debug, Error)]
pub enum ClassroomError {
    /// Missing or invalid credential
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Authenticated, but the role does not allow the action
    #[error("not allowed: {0}")]
    Authorization(String),

    #[error("{message}")]
    Validation { kind: ValidationKind, message: String },

    #[error("{0} not found")]
    NotFound(String),

    /// Resource outside the caller's class or not owned by the caller
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("store error: {0}")]
    Store(#[from] serde_json::Error),
}

pub type ClassroomResult<T> = Result<T, ClassroomError>;

impl ClassroomError {
    pub fn validation(kind: ValidationKind, message: impl Into<String>) -> Self {
        ClassroomError::Validation { kind, message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ClassroomError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ClassroomError::Authorization(_) => StatusCode::FORBIDDEN,
            ClassroomError::Validation { kind: ValidationKind::AlreadyDeleted, .. } => StatusCode::CONFLICT,
            ClassroomError::Validation { .. } => StatusCode::BAD_REQUEST,
            ClassroomError::NotFound(_) => StatusCode::NOT_FOUND,
            ClassroomError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ClassroomError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code shared by REST error bodies and streaming error frames
    pub fn reason(&self) -> &'static str {
        match self {
            ClassroomError::Authentication(_) => "AUTHENTICATION_FAILED",
            ClassroomError::Authorization(_) => "FORBIDDEN",
            ClassroomError::Validation { kind, .. } => kind.code(),
            ClassroomError::NotFound(_) => "NOT_FOUND",
            ClassroomError::AccessDenied(_) => "ACCESS_DENIED",
            ClassroomError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn to_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        error_response(self.status_code(), self.to_string(), self.reason())
    }
}

impl From<ClassroomError> for (StatusCode, Json<ErrorResponse>) {
    fn from(e: ClassroomError) -> Self {
        e.to_response()
    }
}

/// Build the JSON error body every REST handler returns
pub fn error_response(status: StatusCode, error: impl Into<String>, reason: &str) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse {
        code: status.as_u16(),
        status: status.to_string(),
        error: error.into(),
        reason: reason.to_string(),
    }))
}
