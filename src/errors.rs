//! Error types and HTTP response conversion.
//!
//! [`Error`] is the crate-wide error enum. Admin HTTP handlers return
//! `Result<Json<T>, Error>`; [`IntoResponse`] renders the single envelope
//! `{error:{code,message,details?}}` with `code` drawn from
//! `BAD_REQUEST | NOT_FOUND | CONFLICT | INTERNAL`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::db::errors::DbError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Malformed or semantically invalid caller input (bad query params,
    /// unparseable payload, empty topic, etc).
    #[error("{message}")]
    InvalidInput { message: String },

    /// A startup-time configuration invariant was violated (for example
    /// `visibility_timeout < lock_ttl`, or `WEBHOOK_ALLOW_INSECURE_TLS` set
    /// while `environment = production`).
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Requested resource not found.
    #[error("{resource} with id {id} not found")]
    NotFound { resource: String, id: String },

    /// Unique-violation on delivery insert (expected during duplicate
    /// scheduling) or any other conflicting state change surfaced to admin.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The queue store (Redis) or database could not be reached.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Generic internal failure with no more specific classification.
    #[error("failed to {operation}")]
    Internal { operation: String },

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::StoreUnavailable { message: err.to_string() }
    }
}

impl From<crate::queue::store::QueueError> for Error {
    fn from(err: crate::queue::store::QueueError) -> Self {
        match err {
            crate::queue::store::QueueError::Redis(e) => Error::StoreUnavailable { message: e.to_string() },
            other => Error::Internal { operation: other.to_string() },
        }
    }
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. } | Error::InvalidConfig { .. } => "BAD_REQUEST",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Conflict { .. } => "CONFLICT",
            Error::StoreUnavailable { .. } | Error::Internal { .. } => "INTERNAL",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "NOT_FOUND",
                DbError::UniqueViolation { .. } => "CONFLICT",
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "BAD_REQUEST",
                DbError::Other(_) => "INTERNAL",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe message; internal errors never leak their cause.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidInput { message } => message.clone(),
            Error::InvalidConfig { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with id {id} not found"),
            Error::Conflict { message } => message.clone(),
            Error::StoreUnavailable { .. } | Error::Internal { .. } => "internal error".to_string(),
            Error::Database(DbError::NotFound) => "resource not found".to_string(),
            Error::Database(DbError::UniqueViolation { .. }) => "resource already exists".to_string(),
            Error::Database(DbError::ForeignKeyViolation { .. }) => "invalid reference to related resource".to_string(),
            Error::Database(DbError::CheckViolation { .. }) => "invalid data provided".to_string(),
            Error::Database(DbError::Other(_)) => "internal error".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::StoreUnavailable { .. } | Error::Internal { .. } | Error::Database(DbError::Other(_)) => {
                tracing::error!(error = %self, "internal error");
            }
            Error::InvalidConfig { .. } => tracing::error!(error = %self, "configuration error"),
            Error::Database(_) => tracing::warn!(error = %self, "database constraint error"),
            Error::Conflict { .. } => tracing::warn!(error = %self, "conflict"),
            Error::InvalidInput { .. } | Error::NotFound { .. } => tracing::debug!(error = %self, "client error"),
        }

        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                details: None,
            },
        };

        (status, axum::response::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
