//! Error types shared across the relay.
//!
//! Library operations return the narrow enums defined here; HTTP handlers
//! convert them into [`ApiError`], which always renders the structured
//! `{ "error", "details" }` body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors raised by the stream client registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry lock was poisoned by a panicking writer.
    #[error("stream client registry is unavailable")]
    Unavailable,

    /// A caller-supplied client id is already registered.
    #[error("stream client already registered: {0}")]
    DuplicateClient(String),
}

/// Errors raised by durable session storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage is disabled or cannot be reached.
    #[error("session storage unavailable: {0}")]
    Unavailable(String),

    /// An I/O error occurred while reading or writing storage.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be decoded.
    #[error("corrupt session storage: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors raised by attachment intake when gating is enabled.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("attachment '{name}' is {size_kb} KB, limit is {limit_kb} KB")]
    Oversized {
        name: String,
        size_kb: u64,
        limit_kb: u64,
    },
}

/// Error body returned by every HTTP handler.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

/// Boundary error for request-scoped handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or undecodable client input.
    #[error("{error}: {details}")]
    BadRequest { error: String, details: String },

    /// Body or attachment exceeds a configured limit.
    #[error("{error}: {details}")]
    PayloadTooLarge { error: String, details: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, or anonymous, but not allowed to do this.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Internal or transient fault.
    #[error("{error}: {details}")]
    Internal { error: String, details: String },
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::BadRequest {
            error: error.into(),
            details: details.into(),
        }
    }

    pub fn internal(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Internal {
            error: error.into(),
            details: details.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_body(self) -> ErrorBody {
        match self {
            Self::BadRequest { error, details }
            | Self::PayloadTooLarge { error, details }
            | Self::Internal { error, details } => ErrorBody { error, details },
            Self::Unauthorized(details) => ErrorBody {
                error: "Unauthorized".to_string(),
                details,
            },
            Self::Forbidden(details) => ErrorBody {
                error: "Forbidden".to_string(),
                details,
            },
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        Self::PayloadTooLarge {
            error: "Attachment rejected".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateClient(_) => {
                Self::bad_request("Stream registration failed", err.to_string())
            }
            RegistryError::Unavailable => {
                Self::internal("Stream registration failed", err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(name: "api.error", status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(name: "api.rejected", status = %status, error = %self, "Request rejected");
        }
        (status, Json(self.into_body())).into_response()
    }
}
