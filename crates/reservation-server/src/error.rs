//! HTTP error types for the reservation server.
//!
//! Maps domain errors from `reservation-core` into HTTP responses as a
//! machine-readable `error` field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use reservation_core::error::{DispatchError, OrchestratorError, PluginError, StoreError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input.
    BadRequest(String),
    /// A conflict (e.g. a lease name already in use).
    Conflict(String),
    /// Requested resource not found.
    NotFound(String),
    /// The lease was not in a status this operation could start from.
    Conflict409Status(String),
    /// Internal server error.
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
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict409Status(msg) => (StatusCode::CONFLICT, "invalid_status", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::MissingParameter { .. }
            | OrchestratorError::MissingTrustId
            | OrchestratorError::InvalidDate { .. }
            | OrchestratorError::InvalidInput { .. }
            | OrchestratorError::UnsupportedResourceType { .. }
            | OrchestratorError::CantUpdateParameter { .. } => Self::BadRequest(err.to_string()),

            OrchestratorError::LeaseNameAlreadyExists { .. } => Self::Conflict(err.to_string()),

            OrchestratorError::InvalidStatus { .. } => Self::Conflict409Status(err.to_string()),

            OrchestratorError::NotFound { .. } => Self::NotFound(err.to_string()),

            OrchestratorError::Plugin(ref inner) => match inner {
                PluginError::UnsupportedResourceType { .. } | PluginError::UnknownName { .. } => {
                    Self::BadRequest(err.to_string())
                }
                PluginError::DuplicateResourceType { .. } => Self::Internal(err.to_string()),
                PluginError::ConstructorFailed { .. } | PluginError::Operation { .. } => {
                    Self::Internal(err.to_string())
                }
            },

            OrchestratorError::Store(ref inner) => match inner {
                StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
                StoreError::DuplicateName { .. } => Self::Conflict(err.to_string()),
                StoreError::Codec { .. } | StoreError::Backend(_) => Self::Internal(err.to_string()),
            },
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnsupportedResourceType { .. } | DispatchError::UnknownPluginMethod { .. } => {
                Self::BadRequest(err.to_string())
            }
            DispatchError::UnknownMethod { .. } => Self::NotFound(err.to_string()),
            DispatchError::InvalidPayload { .. } => Self::BadRequest(err.to_string()),
            DispatchError::Orchestrator(inner) => Self::from(inner),
        }
    }
}
