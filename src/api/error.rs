//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::{ApiAuthError, error_response};
use crate::error::{AuthError, ErrorKind};
use crate::jwt::JwtError;
use crate::permissions::ResolveError;
use crate::verification::CodeError;

/// Code used for malformed or missing request parameters.
pub const INVALID_PARAM: u32 = 400;

/// Successful response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    code: u32,
    msg: &'static str,
    data: T,
}

/// Wrap `data` in the `{code: 200, msg: "OK", data}` envelope.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 200,
        msg: "OK",
        data,
    })
}

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    BadRequest(String),
    /// Store failure, already logged with context
    Database,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Database
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl From<ApiAuthError> for ApiError {
    fn from(e: ApiAuthError) -> Self {
        Self::Auth(e.0)
    }
}

impl From<JwtError> for ApiError {
    fn from(e: JwtError) -> Self {
        Self::Auth(e.into())
    }
}

impl From<CodeError> for ApiError {
    fn from(e: CodeError) -> Self {
        Self::Auth(e.into())
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        Self::Auth(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => ApiAuthError(e).into_response(),
            ApiError::BadRequest(msg) => {
                error_response(StatusCode::BAD_REQUEST, INVALID_PARAM, &msg)
            }
            ApiError::Database => {
                let kind = ErrorKind::Internal;
                error_response(StatusCode::INTERNAL_SERVER_ERROR, kind.code(), "Database error")
            }
        }
    }
}

/// Loose email shape check: one `@`, something on each side, a dot in the domain.
pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });

    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request("Invalid email address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(validate_email("first.last@sub.example.org").is_ok());
        assert!(validate_email("a@x").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("a@@x.com").is_err());
        assert!(validate_email("a b@x.com").is_err());
        assert!(validate_email("a@x.com.").is_err());
    }

    #[test]
    fn test_bad_request_status() {
        let response = ApiError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
