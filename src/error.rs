//! Authentication and authorization error taxonomy.
//!
//! Every failure is a value. `ErrorKind` is the stable classification the HTTP
//! boundary maps to a numeric code and message.

use crate::jwt::JwtError;
use crate::permissions::ResolveError;
use crate::verification::{CodeError, RenderError};

/// Stable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredentials,
    UserDisabled,
    UsernameTaken,
    NotAuthenticated,
    PermissionDenied,
    TokenMalformed,
    TokenExpired,
    TokenNotYetValid,
    TokenWrongType,
    TokenBadSignature,
    TokenWrongIssuerOrAudience,
    TokenAlgorithmMismatch,
    TokenRevoked,
    CaptchaMismatch,
    CaptchaExpiredOrUnknown,
    EmailCodeMismatch,
    EmailCodeExpiredOrUnknown,
    EmailSend,
    PermissionDataIntegrity,
    ConfigError,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Numeric code returned to clients in the response envelope.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::UsernameTaken => 1001,
            ErrorKind::InvalidCredentials => 1002,
            ErrorKind::TokenRevoked => 1004,
            ErrorKind::TokenExpired => 1005,
            ErrorKind::TokenBadSignature => 1006,
            ErrorKind::TokenMalformed | ErrorKind::TokenWrongType | ErrorKind::TokenNotYetValid => {
                1007
            }
            ErrorKind::TokenWrongIssuerOrAudience => 1009,
            ErrorKind::TokenAlgorithmMismatch => 1010,
            ErrorKind::UserDisabled => 1011,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::PermissionDenied => 4001,
            ErrorKind::PermissionDataIntegrity => 4002,
            ErrorKind::CaptchaMismatch => 5001,
            ErrorKind::CaptchaExpiredOrUnknown => 5002,
            ErrorKind::EmailSend => 5003,
            ErrorKind::EmailCodeMismatch => 5004,
            ErrorKind::EmailCodeExpiredOrUnknown => 5005,
            ErrorKind::ConfigError => 5006,
            ErrorKind::Timeout | ErrorKind::Internal => 500,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::InvalidCredentials => "Invalid username or password",
            ErrorKind::UserDisabled => "User is disabled",
            ErrorKind::UsernameTaken => "Username is already taken",
            ErrorKind::NotAuthenticated => "Not authenticated",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::TokenMalformed => "Malformed token",
            ErrorKind::TokenExpired => "Token has expired",
            ErrorKind::TokenNotYetValid => "Token is not valid yet",
            ErrorKind::TokenWrongType => "Wrong token type",
            ErrorKind::TokenBadSignature => "Invalid token signature",
            ErrorKind::TokenWrongIssuerOrAudience => "Token issuer or audience mismatch",
            ErrorKind::TokenAlgorithmMismatch => "Unexpected token algorithm",
            ErrorKind::TokenRevoked => "Refresh token has been revoked",
            ErrorKind::CaptchaMismatch => "Wrong captcha",
            ErrorKind::CaptchaExpiredOrUnknown => "Captcha expired",
            ErrorKind::EmailCodeMismatch => "Wrong email code",
            ErrorKind::EmailCodeExpiredOrUnknown => "Email code expired",
            ErrorKind::EmailSend => "Failed to send email",
            ErrorKind::PermissionDataIntegrity => "Permission data is inconsistent",
            ErrorKind::ConfigError => "Server misconfigured",
            ErrorKind::Timeout => "Upstream timeout",
            ErrorKind::Internal => "Internal error",
        }
    }
}

/// Any failure of the authentication core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("user is disabled")]
    UserDisabled,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("permission denied")]
    PermissionDenied,
    #[error("refresh token has been revoked or already used")]
    TokenRevoked,
    #[error(transparent)]
    Token(#[from] JwtError),
    #[error(transparent)]
    Code(#[from] CodeError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to send email: {0}")]
    EmailSend(String),
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    CaptchaRender(#[from] RenderError),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AuthError::UserDisabled => ErrorKind::UserDisabled,
            AuthError::UsernameTaken => ErrorKind::UsernameTaken,
            AuthError::NotAuthenticated => ErrorKind::NotAuthenticated,
            AuthError::PermissionDenied => ErrorKind::PermissionDenied,
            AuthError::TokenRevoked => ErrorKind::TokenRevoked,
            AuthError::Token(e) => e.kind(),
            AuthError::Code(e) => e.kind(),
            AuthError::Resolve(e) => e.kind(),
            AuthError::EmailSend(_) => ErrorKind::EmailSend,
            AuthError::Store(_) | AuthError::PasswordHash(_) | AuthError::CaptchaRender(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn code(&self) -> u32 {
        self.kind().code()
    }

    /// Client-facing message. Never includes the underlying cause.
    pub fn message(&self) -> &'static str {
        self.kind().message()
    }
}

impl JwtError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JwtError::Config(_) => ErrorKind::ConfigError,
            JwtError::Signing(_) => ErrorKind::Internal,
            JwtError::Malformed => ErrorKind::TokenMalformed,
            JwtError::Expired => ErrorKind::TokenExpired,
            JwtError::NotYetValid => ErrorKind::TokenNotYetValid,
            JwtError::BadSignature => ErrorKind::TokenBadSignature,
            JwtError::AlgorithmMismatch => ErrorKind::TokenAlgorithmMismatch,
            JwtError::WrongIssuer | JwtError::WrongAudience => {
                ErrorKind::TokenWrongIssuerOrAudience
            }
            JwtError::WrongTokenType => ErrorKind::TokenWrongType,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_kinds_map_to_codes() {
        assert_eq!(AuthError::from(JwtError::Expired).code(), 1005);
        assert_eq!(AuthError::from(JwtError::BadSignature).code(), 1006);
        assert_eq!(AuthError::from(JwtError::WrongAudience).code(), 1009);
        assert_eq!(AuthError::from(JwtError::WrongIssuer).code(), 1009);
        assert_eq!(AuthError::from(JwtError::AlgorithmMismatch).code(), 1010);
        assert_eq!(
            AuthError::from(JwtError::Config("missing")).kind(),
            ErrorKind::ConfigError
        );
    }

    #[test]
    fn test_code_kinds_map_to_codes() {
        assert_eq!(AuthError::from(CodeError::CaptchaMismatch).code(), 5001);
        assert_eq!(
            AuthError::from(CodeError::CaptchaExpiredOrUnknown).code(),
            5002
        );
        assert_eq!(AuthError::from(CodeError::EmailCodeMismatch).code(), 5004);
        assert_eq!(
            AuthError::from(CodeError::EmailCodeExpiredOrUnknown).code(),
            5005
        );
    }

    #[test]
    fn test_integrity_error_is_not_internal() {
        let err = AuthError::from(ResolveError::DataIntegrity { node_id: 3 });
        assert_eq!(err.kind(), ErrorKind::PermissionDataIntegrity);
        assert_eq!(err.code(), 4002);
    }
}
