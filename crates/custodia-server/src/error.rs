//! HTTP error types for the Custodia server.
//!
//! Maps domain errors from `custodia-core` into HTTP responses. Every error
//! variant produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use custodia_core::error::{AuthError, ConsumerError, KemError, MessageError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    NotAcceptable(String),
    MethodNotAllowed,
    /// A forwarding loop was detected via `X-LOOP-CUSTODIA`.
    LoopDetected,
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::NotAcceptable(msg) => (StatusCode::NOT_ACCEPTABLE, "not_acceptable", msg),
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                "unsupported method/path combination".to_owned(),
            ),
            Self::LoopDetected => (
                StatusCode::BAD_GATEWAY,
                "loop_detected",
                "request already passed through this server".to_owned(),
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, axum::Json(ErrorBody { error: error_type, message })).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Denied => Self::Unauthorized(err.to_string()),
            AuthError::Forbidden(_) => Self::Forbidden(err.to_string()),
            AuthError::Plugin(_) | AuthError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ConsumerError> for AppError {
    fn from(err: ConsumerError) -> Self {
        match err {
            ConsumerError::MethodNotAllowed => Self::MethodNotAllowed,
            ConsumerError::BadRequest(_) => Self::BadRequest(err.to_string()),
            ConsumerError::Forbidden(_) => Self::Forbidden(err.to_string()),
            ConsumerError::NotFound(_) => Self::NotFound(err.to_string()),
            ConsumerError::Conflict(_) => Self::Conflict(err.to_string()),
            ConsumerError::Message(ref inner) => match inner {
                MessageError::UnallowedType(_) | MessageError::UnknownType(_) => {
                    Self::NotAcceptable(err.to_string())
                }
                MessageError::Invalid(_) => Self::BadRequest(err.to_string()),
            },
            ConsumerError::Kem(ref inner) => match inner {
                KemError::VerificationFailed(_)
                | KemError::SubjectMismatch { .. }
                | KemError::ExpiredOrTooFar => Self::Unauthorized(err.to_string()),
                KemError::KeyNotFound { .. } => Self::NotFound(err.to_string()),
                KemError::Malformed(_) | KemError::UnsupportedAlgorithm { .. } => {
                    Self::BadRequest(err.to_string())
                }
                KemError::Storage(_) => Self::Internal(err.to_string()),
            },
            ConsumerError::Store(_) => Self::Internal(err.to_string()),
        }
    }
}
