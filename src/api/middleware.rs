use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message sent to the client in place of an unexpected failure.
const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<String>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    NotFound {
        message: String,
        details: Option<String>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },

    /// Failure with no client-facing explanation; the cause is only logged.
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Request canceled")]
    RequestCanceled,

    #[error("Processing too slow")]
    Timeout,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
            details: None,
        }
    }

    pub fn internal_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Connection(_) | AppError::Internal { .. } | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::RequestCanceled => StatusCode::REQUEST_TIMEOUT,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Build the wire envelope. Connection and unexpected failures keep their cause server-side.
    pub fn to_api_error(&self) -> ApiError {
        let status = self.status_code();
        let (message, details) = match self {
            AppError::BadRequest { message, details }
            | AppError::NotFound { message, details }
            | AppError::Internal { message, details } => (message.clone(), details.clone()),
            AppError::Unauthorized(message) => (message.clone(), None),
            AppError::Connection(_) => ("Error connecting to database".to_string(), None),
            AppError::Unexpected(_) => (UNEXPECTED_ERROR.to_string(), None),
            AppError::RequestCanceled | AppError::Timeout => (self.to_string(), None),
        };
        ApiError::new(status, message, details)
    }

    fn log(&self) {
        let details = match self {
            AppError::BadRequest { details, .. }
            | AppError::NotFound { details, .. }
            | AppError::Internal { details, .. } => details.as_deref(),
            _ => None,
        };
        let status = self.status_code();
        match details {
            Some(details) if status.is_server_error() => {
                tracing::error!(status = status.as_u16(), details, "Error handling request: {}", self)
            }
            None if status.is_server_error() => {
                tracing::error!(status = status.as_u16(), "Error handling request: {}", self)
            }
            Some(details) => {
                tracing::warn!(status = status.as_u16(), details, "Error handling request: {}", self)
            }
            None => tracing::warn!(status = status.as_u16(), "Error handling request: {}", self),
        }
    }
}

/// Error envelope written to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, details: Option<String>) -> Self {
        let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
        let mut message = message.into();
        if message.is_empty() {
            message = status_text.clone();
        }
        Self {
            status: status.as_u16(),
            status_text,
            error: message,
            details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        (status, Json(self.to_api_error())).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal_with_details("Error writing response", err.to_string())
    }
}
