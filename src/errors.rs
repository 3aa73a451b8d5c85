use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::access::{AccessError, ExtensionError};
use crate::executor::ExecuteError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Operation, item or field denial. Rendered verbatim.
    #[error("{0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error(transparent)]
    AccessControl(AccessError),
    #[error("request was cancelled")]
    Cancelled,
    #[error("storage error")]
    Store(#[from] StoreError),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extensions: Vec<ExtensionError>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::AccessControl(err) if err.is_cancelled() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AccessControl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = match &self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::AccessDenied(_) => "access_denied",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::Token(_) => "token",
            AppError::AccessControl(_) => "access_control",
            AppError::Cancelled => "cancelled",
            AppError::Store(_) => "store",
            AppError::Internal(_) => "internal",
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let extensions = match &self {
            AppError::AccessControl(err) => err.extensions(),
            _ => Vec::new(),
        };

        let payload = ErrorResponse {
            error: error.to_string(),
            message: self.to_string(),
            extensions,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<ExecuteError> for AppError {
    fn from(value: ExecuteError) -> Self {
        match value {
            ExecuteError::UnknownList(_) => Self::NotFound(value.to_string()),
            ExecuteError::AccessDenied(message) => Self::AccessDenied(message),
            ExecuteError::Access(AccessError::Configuration(err)) => Self::Configuration(err.to_string()),
            ExecuteError::Access(err) => Self::AccessControl(err),
            ExecuteError::InvalidWhere(_) | ExecuteError::InvalidData(_) => Self::BadRequest(value.to_string()),
            ExecuteError::Cancelled => Self::Cancelled,
            ExecuteError::Store(err @ StoreError::NotFound { .. }) => Self::NotFound(err.to_string()),
            ExecuteError::Store(err) => Self::Store(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
