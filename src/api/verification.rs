//! Verification code endpoints.
//!
//! - GET `/captcha` - Generate a captcha image
//! - POST `/email/code` - Send an email confirmation code

use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::auth::check_captcha;
use super::error::{ApiError, ok, validate_email};
use crate::error::AuthError;
use crate::rate_limit::{RateLimiters, rate_limit_captcha, rate_limit_email};
use crate::verification::{
    CaptchaConfig, CaptchaRenderer, Mailer, VerificationCodes, dispatch_email_code,
};

#[derive(Clone)]
pub struct VerificationState {
    pub codes: Arc<VerificationCodes>,
    pub captcha: Arc<CaptchaConfig>,
    pub renderer: Arc<dyn CaptchaRenderer>,
    pub mailer: Arc<dyn Mailer>,
    pub email_code_ttl: Duration,
    pub captcha_required: bool,
    /// Development only: include the captcha answer in the response
    pub expose_captcha_answer: bool,
}

pub fn router(state: VerificationState, limiters: RateLimiters) -> Router {
    let captcha_router = Router::new()
        .route("/captcha", get(captcha))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            limiters.clone(),
            rate_limit_captcha,
        ));

    let email_router = Router::new()
        .route("/email/code", post(email_code))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiters, rate_limit_email));

    Router::new().merge(captcha_router).merge(email_router)
}

#[derive(Serialize)]
struct CaptchaResponse {
    #[serde(rename = "captchaId")]
    captcha_id: String,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
}

#[derive(Deserialize)]
struct EmailCodeRequest {
    email: String,
    #[serde(default, rename = "captchaId", alias = "captchaID")]
    captcha_id: Option<String>,
    #[serde(default, rename = "captchaCode")]
    captcha_code: Option<String>,
}

#[derive(Serialize)]
struct EmailCodeResponse {
    #[serde(rename = "emailSessionId")]
    email_session_id: String,
}

async fn captcha(
    State(state): State<VerificationState>,
) -> Result<impl IntoResponse, ApiError> {
    let captcha = state
        .codes
        .generate_captcha(&state.captcha, state.renderer.as_ref())
        .map_err(AuthError::from)?;

    Ok(ok(CaptchaResponse {
        captcha_id: captcha.id,
        image: captcha.image,
        answer: state.expose_captcha_answer.then_some(captcha.answer),
    }))
}

async fn email_code(
    State(state): State<VerificationState>,
    Json(req): Json<EmailCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim();
    validate_email(email)?;

    check_captcha(
        &state.codes,
        state.captcha_required,
        req.captcha_id.as_deref(),
        req.captcha_code.as_deref(),
    )?;

    let session_id = dispatch_email_code(
        &state.codes,
        state.mailer.as_ref(),
        email,
        state.email_code_ttl,
    )
    .await?;

    info!("Email verification code issued");

    Ok(ok(EmailCodeResponse {
        email_session_id: session_id,
    }))
}
