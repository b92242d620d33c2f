//! Error types and HTTP response conversion
//!
//! One variant per row of the error taxonomy: transport/parse failures from
//! the state engine, credential/session failures from the auth engine, plus
//! the ambient configuration/database/internal variants every layer needs.

#[cfg(feature = "http")]
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Database error (connection, query, constraint)
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(Box<sqlx::Error>),

    /// Object store / backend transport error (C1)
    #[error("Backend error ({kind}): {cause}")]
    Backend { kind: BackendErrorKind, cause: String },

    /// State JSON failed to parse (C2)
    #[error("Failed to parse state document: {0}")]
    Parse(String),

    /// Unknown snapshot id (C4)
    #[error("State snapshot not found: {0}")]
    StateNotFound(String),

    /// Address not found / snapshot changed underneath a mutation (C4)
    #[error("Mutation failed: {0}")]
    Mutation(String),

    /// Bad password or unknown user (C6). `retry_after_secs` is set when
    /// this same attempt tripped a lockout — the response stays 401, it
    /// just also carries `Retry-After` for a well-behaved client.
    #[error("Incorrect credentials")]
    InvalidCredentials { retry_after_secs: Option<u64> },

    /// User account disabled (C6)
    #[error("User account is inactive")]
    InactiveUser,

    /// Refresh token signature/type/CSRF invalid (C6)
    #[error("Invalid refresh token: {0}")]
    RefreshToken(String),

    /// Refresh session past expiry (C6)
    #[error("Refresh token expired")]
    RefreshTokenExpired,

    /// Revoked or hash-mismatched refresh token presented (C6)
    #[error("Refresh token reuse detected")]
    RefreshTokenReuse,

    /// Lockout active (C7)
    #[error("Too many login attempts")]
    RateLimited { retry_after_secs: u64 },

    /// Duplicate user email or other uniqueness violation (C8)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JWT encode/decode failure
    #[error("Token error: {0}")]
    Jwt(Box<jsonwebtoken::errors::Error>),

    /// Generic internal error — never shown verbatim to callers
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Cause category for `Error::Backend`, surfaced in logs and the error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Unauthorized,
    NotFound,
    Timeout,
    Transport,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NotFound => write!(f, "not_found"),
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Error::StateNotFound("row not found".to_string()),
            _ => Error::Database(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Jwt(Box::new(e))
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(Box::new(e))
    }
}

/// Error response body returned across the HTTP boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub status: u16,
}

#[cfg(feature = "http")]
impl ErrorResponse {
    fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
            status: status.as_u16(),
        }
    }
}

#[cfg(feature = "http")]
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Config(e) => {
                tracing::error!("configuration error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", "Internal server error"),
                )
            }
            #[cfg(feature = "database")]
            Error::Database(e) => {
                tracing::error!("database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Internal server error"),
                )
            }
            Error::Backend { kind, cause } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(StatusCode::BAD_REQUEST, "BACKEND_ERROR", format!("{kind}: {cause}")),
            ),
            Error::Parse(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(StatusCode::BAD_REQUEST, "PARSE_ERROR", msg.clone()),
            ),
            Error::StateNotFound(id) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(StatusCode::NOT_FOUND, "STATE_NOT_FOUND", format!("state not found: {id}")),
            ),
            Error::Mutation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(StatusCode::BAD_REQUEST, "MUTATION_ERROR", msg.clone()),
            ),
            Error::InvalidCredentials { .. } => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", "Incorrect credentials"),
            ),
            Error::InactiveUser => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new(StatusCode::FORBIDDEN, "INACTIVE_USER", "User account is inactive"),
            ),
            Error::RefreshToken(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "REFRESH_TOKEN_INVALID", msg.clone()),
            ),
            Error::RefreshTokenExpired => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "REFRESH_TOKEN_EXPIRED", "Refresh token expired"),
            ),
            Error::RefreshTokenReuse => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "REFRESH_TOKEN_REUSE", "Refresh token reuse detected"),
            ),
            Error::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "Too many login attempts"),
            ),
            Error::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::new(StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ),
            Error::Jwt(e) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", e.to_string()),
            ),
            Error::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error"),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        let retry_after_secs = match self {
            Error::RateLimited { retry_after_secs } => Some(retry_after_secs),
            Error::InvalidCredentials { retry_after_secs } => retry_after_secs,
            _ => None,
        };
        if let Some(retry_after_secs) = retry_after_secs {
            if let Ok(value) = http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_kind_display() {
        assert_eq!(BackendErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(BackendErrorKind::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn json_parse_error_maps_to_parse_variant() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let mapped: Error = err.unwrap_err().into();
        assert!(matches!(mapped, Error::Parse(_)));
    }
}
