//! Session endpoints.
//!
//! - POST `/login` - Exchange credentials (and a captcha when enabled) for a token pair
//! - POST `/refresh` - Rotate a refresh token into a new pair
//! - POST `/logout` - Consume a refresh token

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt, ok};
use super::users::UserInfo;
use crate::auth::check_password;
use crate::db::{Database, UserStatus};
use crate::error::AuthError;
use crate::jwt::{RefreshLedger, TokenService};
use crate::permissions::PermissionResolver;
use crate::rate_limit::{RateLimiters, rate_limit_login};
use crate::verification::VerificationCodes;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub codes: Arc<VerificationCodes>,
    pub resolver: PermissionResolver,
    pub captcha_required: bool,
}

pub fn router(state: AuthState, limiters: RateLimiters) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limiters, rate_limit_login));

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .with_state(state)
        .merge(login_router)
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
    #[serde(default, rename = "captchaId", alias = "captchaID")]
    captcha_id: Option<String>,
    #[serde(default, rename = "captchaCode")]
    captcha_code: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    refresh_token: String,
    /// Access token lifetime in seconds
    expires_in: u64,
    user: UserInfo,
    is_admin: bool,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshResponse {
    token: String,
    refresh_token: String,
    expires_in: u64,
}

/// Check the captcha when required. The entry is cleared whatever the outcome.
pub(super) fn check_captcha(
    codes: &VerificationCodes,
    required: bool,
    id: Option<&str>,
    answer: Option<&str>,
) -> Result<(), ApiError> {
    if !required {
        return Ok(());
    }
    let (Some(id), Some(answer)) = (id, answer) else {
        return Err(ApiError::bad_request("Captcha is required"));
    };
    codes.verify_captcha(id, answer, true)?;
    Ok(())
}

async fn login(
    State(state): State<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_captcha(
        &state.codes,
        state.captcha_required,
        req.captcha_id.as_deref(),
        req.captcha_code.as_deref(),
    )?;

    let user = state
        .db
        .users()
        .get_by_username(req.username.trim())
        .await
        .db_err("Failed to get user")?;

    // Unknown user and wrong password are indistinguishable to the client,
    // in the response and in the time it takes
    let hash = user.as_ref().map(|u| u.password_hash.as_str());
    let verified = check_password(&req.password, hash).await?;
    let Some(user) = user.filter(|_| verified) else {
        warn!(username = %req.username, "Failed login attempt");
        return Err(AuthError::InvalidCredentials.into());
    };

    if user.status != UserStatus::Active {
        warn!(user_id = user.id, "Login attempt by disabled user");
        return Err(AuthError::UserDisabled.into());
    }

    let role_ids = state
        .db
        .roles()
        .active_role_ids(user.id)
        .await
        .db_err("Failed to get user roles")?;

    let access = state
        .tokens
        .issue_access_token(user.id, &user.username, &role_ids)?;
    let refresh = state.tokens.issue_refresh_token(user.id)?;
    state
        .db
        .record(user.id, &refresh)
        .await
        .db_err("Failed to record refresh token")?;

    info!(user_id = user.id, roles = role_ids.len(), "User logged in");

    Ok(ok(LoginResponse {
        token: access.token,
        refresh_token: refresh.token,
        expires_in: access.duration,
        is_admin: user.is_admin,
        user: UserInfo::from(&user),
    }))
}

/// Any failure here is terminal: the client has to log in again.
async fn refresh(
    State(state): State<AuthState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pair = state
        .tokens
        .refresh_tokens(&req.refresh_token, &state.resolver, &state.db)
        .await?;

    info!(user_id = pair.access.claims.user_id, "Tokens refreshed");

    Ok(ok(RefreshResponse {
        token: pair.access.token,
        refresh_token: pair.refresh.token,
        expires_in: pair.access.duration,
    }))
}

/// Logging out twice is not an error; the token just stays consumed.
async fn logout(
    State(state): State<AuthState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = state.tokens.validate_refresh_token(&req.refresh_token)?;

    let consumed = state
        .db
        .consume(&claims.jti)
        .await
        .db_err("Failed to revoke refresh token")?;

    info!(user_id = claims.user_id, consumed, "User logged out");
    Ok(ok(()))
}
