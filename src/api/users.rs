use axum::{Json, Router, extract::State, middleware, response::IntoResponse, routing::post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt, ok, validate_email};
use crate::auth::hash_password_blocking;
use crate::db::{Database, NewUser, User, UserStatus};
use crate::error::AuthError;
use crate::rate_limit::{RateLimiters, rate_limit_register};
use crate::verification::VerificationCodes;

/// Public view of a user. Never includes the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: UserStatus,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_id: Option<i64>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            status: user.status,
            is_admin: user.is_admin,
            department_id: user.department_id,
        }
    }
}

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub codes: Arc<VerificationCodes>,
}

pub fn router(state: UsersState, limiters: RateLimiters) -> Router {
    Router::new()
        .route("/register", post(register))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiters, rate_limit_register))
}

const MAX_USERNAME_LENGTH: usize = 32;
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    email: String,
    #[serde(rename = "emailSessionId", alias = "emailID")]
    email_session_id: String,
    #[serde(rename = "emailCode")]
    email_code: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    id: i64,
    username: String,
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::bad_request("Username cannot be empty"));
    }

    if username.len() > MAX_USERNAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Username cannot be longer than {} characters",
            MAX_USERNAME_LENGTH
        )));
    }

    // Only allow alphanumeric and underscores
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::bad_request(
            "Username can only contain letters, numbers, and underscores",
        ));
    }

    Ok(())
}

/// Create an account once the email code checks out.
///
/// The code is removed only after the user row exists, so a rejected attempt
/// (for example a taken username) can be retried with the same code.
async fn register(
    State(state): State<UsersState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim();
    let email = req.email.trim();

    validate_username(username)?;
    validate_email(email)?;
    if req.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    state
        .codes
        .verify_email_code(&req.email_session_id, email, &req.email_code)?;

    let users = state.db.users();
    if !users
        .is_username_available(username)
        .await
        .db_err("Failed to check username")?
    {
        return Err(AuthError::UsernameTaken.into());
    }
    if !users
        .is_email_available(email)
        .await
        .db_err("Failed to check email")?
    {
        return Err(ApiError::bad_request("Email is already registered"));
    }

    let password_hash = hash_password_blocking(&req.password).await?;

    let id = match users
        .create(&NewUser {
            username,
            email: Some(email),
            password_hash: &password_hash,
            is_admin: false,
        })
        .await
    {
        Ok(id) => id,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            warn!(username = %username, "Username taken during registration");
            return Err(AuthError::UsernameTaken.into());
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    };

    state.codes.remove_email_code(&req.email_session_id);
    info!(user_id = id, username = %username, "User registered");

    Ok(ok(RegisterResponse {
        id,
        username: username.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }
}
