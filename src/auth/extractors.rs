//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use super::bearer::bearer_token;
use super::errors::ApiAuthError;
use super::state::HasAuthBackend;
use super::types::{ActiveAuthenticatedUser, AuthenticatedUser};
use crate::db::UserStatus;
use crate::error::AuthError;

/// Extractor for endpoints that require a valid access token.
/// Only the token is checked; the database is not consulted.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::NotAuthenticated)?;

        let claims = state.tokens().validate_access_token(token).map_err(|e| {
            debug!(error = %e, "Rejected access token");
            AuthError::from(e)
        })?;

        Ok(Auth(AuthenticatedUser { claims }))
    }
}

/// Extractor for endpoints that require an existing, enabled account.
/// Same as `Auth` but also loads the user and rejects unknown or disabled ones.
pub struct ActiveUser(pub ActiveAuthenticatedUser);

impl<S> FromRequestParts<S> for ActiveUser
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Auth(auth) = Auth::from_request_parts(parts, state).await?;

        let user = state
            .db()
            .users()
            .get_by_id(auth.user_id())
            .await
            .map_err(AuthError::from)?
            .ok_or(AuthError::NotAuthenticated)?;

        if user.status != UserStatus::Active {
            return Err(AuthError::UserDisabled.into());
        }

        Ok(ActiveUser(ActiveAuthenticatedUser {
            claims: auth.claims,
            user,
        }))
    }
}
