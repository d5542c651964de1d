//! HTTP rendering of authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::error::{AuthError, ErrorKind};

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    code: u32,
    msg: &'a str,
}

/// Build the `{code, msg}` error body.
pub fn error_response(status: StatusCode, code: u32, msg: &str) -> Response {
    (status, Json(ErrorEnvelope { code, msg })).into_response()
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidCredentials
        | ErrorKind::NotAuthenticated
        | ErrorKind::TokenMalformed
        | ErrorKind::TokenExpired
        | ErrorKind::TokenNotYetValid
        | ErrorKind::TokenWrongType
        | ErrorKind::TokenBadSignature
        | ErrorKind::TokenWrongIssuerOrAudience
        | ErrorKind::TokenAlgorithmMismatch
        | ErrorKind::TokenRevoked => StatusCode::UNAUTHORIZED,
        ErrorKind::UserDisabled | ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::UsernameTaken => StatusCode::CONFLICT,
        ErrorKind::CaptchaMismatch
        | ErrorKind::CaptchaExpiredOrUnknown
        | ErrorKind::EmailCodeMismatch
        | ErrorKind::EmailCodeExpiredOrUnknown => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::EmailSend
        | ErrorKind::PermissionDataIntegrity
        | ErrorKind::ConfigError
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Rejection produced by the auth extractors and by handlers failing with an
/// `AuthError`.
#[derive(Debug)]
pub struct ApiAuthError(pub AuthError);

impl From<AuthError> for ApiAuthError {
    fn from(e: AuthError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();

        // Store failures keep their cause in the log only
        let msg = match &self.0 {
            AuthError::Store(e) => {
                error!(error = %e, "Database error");
                "Database error"
            }
            AuthError::PasswordHash(e) => {
                error!(error = %e, "Password hashing failed");
                kind.message()
            }
            AuthError::Resolve(e) => {
                error!(error = %e, "Permission resolution failed");
                kind.message()
            }
            AuthError::CaptchaRender(e) => {
                error!(error = %e, "Captcha rendering failed");
                kind.message()
            }
            AuthError::Token(e)
                if kind == ErrorKind::ConfigError || kind == ErrorKind::Internal =>
            {
                error!(error = %e, "Token service failure");
                kind.message()
            }
            _ => kind.message(),
        };

        error_response(status_for(kind), kind.code(), msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::JwtError;
    use crate::permissions::ResolveError;
    use crate::verification::RenderError;

    #[test]
    fn test_statuses() {
        assert_eq!(
            status_for(AuthError::from(JwtError::Expired).kind()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(ErrorKind::UserDisabled), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::UsernameTaken), StatusCode::CONFLICT);
        assert_eq!(
            status_for(AuthError::from(ResolveError::Timeout).kind()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_response_status() {
        let response = ApiAuthError(AuthError::NotAuthenticated).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiAuthError(AuthError::Store(sqlx::Error::RowNotFound)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let render = RenderError("no glyph".to_string());
        let response = ApiAuthError(AuthError::from(render)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
