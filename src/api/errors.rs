use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::entry_workflow::TransitionError;
use crate::services::errors::MarksError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UnprocessableEntity(String),
    TooManyRequests(&'static str),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MarksError> for ApiError {
    fn from(err: MarksError) -> Self {
        let detail = err.to_string();
        match err {
            MarksError::Validation(_) | MarksError::Row(_) => Self::BadRequest(detail),
            MarksError::NotFound(_) => Self::NotFound(detail),
            MarksError::Locked => Self::Forbidden(detail),
            MarksError::Transition(transition) => match transition {
                TransitionError::NotOwner | TransitionError::AdminRequired(_) => {
                    Self::Forbidden(detail)
                }
                TransitionError::NotAllowed { .. } => Self::Conflict(detail),
                TransitionError::MissingActor(_) | TransitionError::MissingReason => {
                    Self::UnprocessableEntity(detail)
                }
            },
            MarksError::Conflict | MarksError::SaveInProgress | MarksError::Stale => {
                Self::Conflict(detail)
            }
            MarksError::Capacity => Self::TooManyRequests("Too many open marks sessions"),
            MarksError::Store(store) => Self::internal(store, "Marks store request failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            ApiError::Unauthorized(message) | ApiError::TooManyRequests(message) => {
                message.to_string()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                message
            }
            ApiError::Forbidden(message)
            | ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::UnprocessableEntity(message) => message,
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}
